//! Project configuration.
//!
//! Settings live in `.workplan/config.yaml`. Every field has a default, so a
//! project without a config file uses the standard layout.

use crate::types::ItemKind;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file path relative to the project root.
pub const CONFIG_FILE_PATH: &str = ".workplan/config.yaml";

/// ID prefixes per kind. Used only to format new ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdPrefixes {
    pub epic: String,
    pub issue: String,
    pub task: String,
    pub pr: String,
}

impl Default for IdPrefixes {
    fn default() -> Self {
        Self {
            epic: "EP".to_string(),
            issue: "ISS".to_string(),
            task: "TSK".to_string(),
            pr: "PR".to_string(),
        }
    }
}

impl IdPrefixes {
    pub fn for_kind(&self, kind: ItemKind) -> &str {
        match kind {
            ItemKind::Epic => &self.epic,
            ItemKind::Issue => &self.issue,
            ItemKind::Task => &self.task,
            ItemKind::Pr => &self.pr,
        }
    }
}

/// Project configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    pub epics_dir: PathBuf,
    pub issues_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub prs_dir: PathBuf,
    pub prefixes: IdPrefixes,
    /// Digits in the numeric part of new ids.
    pub id_width: usize,
    pub index_file: PathBuf,
    pub dependencies_file: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            epics_dir: PathBuf::from("epics"),
            issues_dir: PathBuf::from("issues"),
            tasks_dir: PathBuf::from("tasks"),
            prs_dir: PathBuf::from("prs"),
            prefixes: IdPrefixes::default(),
            id_width: 4,
            index_file: PathBuf::from(".workplan/index.json"),
            dependencies_file: PathBuf::from(".workplan/pr-dependencies.json"),
        }
    }
}

impl ProjectConfig {
    /// Load config from a project root, falling back to defaults when absent.
    pub fn load_from(root: &Path) -> Result<Self> {
        let config_path = Self::config_path(root);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        Ok(config)
    }

    /// Save config under a project root.
    pub fn save_to(&self, root: &Path) -> Result<()> {
        let config_path = Self::config_path(root);
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create .workplan directory")?;
        }
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(&config_path, content).context("Failed to write config")?;
        Ok(())
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE_PATH)
    }

    /// Resolve every configured location against the project root.
    pub fn resolve(&self, root: &Path) -> ProjectPaths {
        ProjectPaths {
            root: root.to_path_buf(),
            epics_dir: root.join(&self.epics_dir),
            issues_dir: root.join(&self.issues_dir),
            tasks_dir: root.join(&self.tasks_dir),
            prs_dir: root.join(&self.prs_dir),
            index_file: root.join(&self.index_file),
            dependencies_file: root.join(&self.dependencies_file),
        }
    }
}

/// Absolute locations for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub epics_dir: PathBuf,
    pub issues_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub prs_dir: PathBuf,
    pub index_file: PathBuf,
    pub dependencies_file: PathBuf,
}

impl ProjectPaths {
    pub fn dir(&self, kind: ItemKind) -> &Path {
        match kind {
            ItemKind::Epic => &self.epics_dir,
            ItemKind::Issue => &self.issues_dir,
            ItemKind::Task => &self.tasks_dir,
            ItemKind::Pr => &self.prs_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::load_from(dir.path()).unwrap();
        assert_eq!(config, ProjectConfig::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".workplan")).unwrap();
        fs::write(
            ProjectConfig::config_path(dir.path()),
            "tasks_dir: work/tasks\nprefixes:\n  task: T\n",
        )
        .unwrap();

        let config = ProjectConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.tasks_dir, PathBuf::from("work/tasks"));
        assert_eq!(config.prefixes.task, "T");
        assert_eq!(config.prefixes.epic, "EP");
        assert_eq!(config.id_width, 4);

        let paths = config.resolve(dir.path());
        assert_eq!(paths.dir(ItemKind::Task), dir.path().join("work/tasks"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut config = ProjectConfig::default();
        config.id_width = 5;
        config.save_to(dir.path()).unwrap();
        assert_eq!(ProjectConfig::load_from(dir.path()).unwrap(), config);
    }
}
