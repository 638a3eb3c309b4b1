//! Project context: the store, index and graph for one invocation.
//!
//! Every mutation writes through the item store first, then patches the
//! index and rebuilds the relationship graph.

use crate::config::{CONFIG_FILE_PATH, ProjectConfig};
use crate::deps::{DependencyRecord, DependencyType};
use crate::error::{Error, ValidationError};
use crate::graph::{Mergeability, RelationshipGraph};
use crate::index::IndexEngine;
use crate::migrate::{self, MigrationLogEntry, MigrationOperation, MigrationReport};
use crate::reconcile::{self, SyncOptions, SyncReport, SyncStatus};
use crate::state::transition_state;
use crate::store::{ItemStore, Patch};
use crate::types::{Item, ItemDetail, ItemKind, State};
use chrono::Utc;
use eyre::{Context, Result};
use std::path::{Path, PathBuf};

pub struct Project {
    root: PathBuf,
    config: ProjectConfig,
    store: ItemStore,
    index: IndexEngine,
    graph: RelationshipGraph,
}

impl Project {
    /// Create the config file and item directories, then open the project.
    pub fn init(root: &Path) -> Result<Self> {
        let config_path = ProjectConfig::config_path(root);
        if !config_path.exists() {
            ProjectConfig::default()
                .save_to(root)
                .context("Failed to write default config")?;
        }
        let config = ProjectConfig::load_from(root)?;
        ItemStore::new(&config, root).ensure_dirs()?;
        log::info!("Initialized workplan project in {}", root.display());
        Self::open(root)
    }

    /// Open a project rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let config = ProjectConfig::load_from(root).context("Failed to load config")?;
        let store = ItemStore::new(&config, root);
        let index = IndexEngine::open(store.clone()).context("Failed to load index")?;
        let graph = RelationshipGraph::load(store.clone()).context("Failed to load relationships")?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            store,
            index,
            graph,
        })
    }

    /// Walk up from `start` to the nearest directory holding a workplan config.
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .find(|dir| dir.join(CONFIG_FILE_PATH).is_file())
            .map(Path::to_path_buf)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    pub fn index(&self) -> &IndexEngine {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut IndexEngine {
        &mut self.index
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut RelationshipGraph {
        &mut self.graph
    }

    fn refresh(&mut self, kind: ItemKind, id: &str) -> Result<()> {
        let update = self.index.update_item(kind, id)?;
        if let Some(e) = update.persist_error {
            log::warn!("Index for {} not persisted: {}", id, e);
        }
        self.graph.rebuild_cache()?;
        Ok(())
    }

    fn check_parent(&self, item: &Item) -> Result<()> {
        let Some((kind, parent_id)) = item.parent() else {
            return Ok(());
        };
        let exists = self.graph.get(parent_id).is_some_and(|p| p.kind() == kind);
        if exists {
            return Ok(());
        }
        let field = match kind {
            ItemKind::Issue => "issue_id",
            _ => "epic_id",
        };
        Err(eyre::eyre!(Error::Validation(ValidationError::DanglingReference {
            item_id: if item.id().is_empty() {
                item.header.title.clone()
            } else {
                item.id().to_string()
            },
            field,
            target_id: parent_id.to_string(),
        })))
    }

    /// Store a new item. Parents must already exist.
    pub fn create_item(&mut self, mut item: Item) -> Result<Item> {
        self.check_parent(&item)?;
        if let ItemDetail::Task(task) = &mut item.detail
            && task.epic_id.is_none()
            && let Some(ItemDetail::Issue(issue)) = self.graph.get(&task.issue_id).map(|i| &i.detail)
        {
            task.epic_id = issue.epic_id.clone();
        }

        let created = self.store.create(item)?;
        self.refresh(created.kind(), created.id())?;
        log::info!("Created {} {}", created.kind(), created.id());
        Ok(created)
    }

    /// Merge `patch` into an item's frontmatter.
    pub fn update_item(&mut self, kind: ItemKind, id: &str, patch: &Patch) -> Result<Item> {
        let path = self
            .store
            .find_path(kind, id)?
            .ok_or_else(|| eyre::eyre!(Error::not_found(kind, id)))?;
        let updated = self.store.update(kind, &path, patch)?;
        self.refresh(kind, id)?;
        Ok(updated)
    }

    pub fn delete_item(&mut self, kind: ItemKind, id: &str) -> Result<PathBuf> {
        let path = self.store.delete(kind, id)?;
        self.refresh(kind, id)?;
        log::info!("Deleted {} {}", kind, id);
        Ok(path)
    }

    /// Move an item to a new unified state.
    pub fn transition(&mut self, kind: ItemKind, id: &str, to: State, actor: &str, reason: Option<&str>) -> Result<Item> {
        let current = self.store.load(kind, id)?;
        let moved = transition_state(&current, to, actor, reason).map_err(|e| eyre::eyre!(e))?;
        let patch = Patch::new()
            .set("state", moved.header.state)?
            .set("state_metadata", &moved.header.state_metadata)?;
        self.update_item(kind, id, &patch)
    }

    /// Migrate every item lacking a unified state.
    ///
    /// Unparseable files and failed writes are logged in the report; the
    /// rest of the batch continues.
    pub fn migrate_all(&mut self, actor: &str, dry_run: bool) -> Result<MigrationReport> {
        let mut items = Vec::new();
        let mut unparsed = Vec::new();
        for kind in ItemKind::ALL {
            let loaded = self.store.load_all(kind)?;
            items.extend(loaded.items);
            unparsed.extend(loaded.failures);
        }

        let mut report = migrate::migrate_items(&items, actor);
        for failure in unparsed {
            report.total += 1;
            report.failed += 1;
            report.log.push(MigrationLogEntry {
                item_id: failure
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                item_type: failure.kind,
                operation: MigrationOperation::AddStateFields,
                old_status: String::new(),
                new_state: None,
                timestamp: Utc::now(),
                success: false,
                error: Some(failure.message),
            });
        }
        if dry_run {
            return Ok(report);
        }

        let migrated: Vec<Item> = report
            .items
            .iter()
            .zip(&items)
            .filter(|(after, before)| after.header.state.is_some() && before.header.state.is_none())
            .map(|(after, _)| after.clone())
            .collect();

        for item in &migrated {
            let patch = Patch::new()
                .set("state", item.header.state)?
                .set("state_metadata", &item.header.state_metadata)?;
            if let Err(e) = self.store.update(item.kind(), &item.file_path, &patch) {
                log::warn!("Failed to write migrated {}: {:#}", item.id(), e);
                if let Some(entry) = report.log.iter_mut().find(|l| l.item_id == item.id() && l.success) {
                    entry.success = false;
                    entry.error = Some(format!("{:#}", e));
                }
                report.migrated -= 1;
                report.failed += 1;
            }
        }

        self.index.rebuild_index()?;
        self.graph.rebuild_cache()?;
        Ok(report)
    }

    /// Undo a migration by stripping the state fields it added.
    pub fn rollback_migration(&mut self, log: &[MigrationLogEntry]) -> Result<usize> {
        let mut rolled_back = 0;
        for op in migrate::rollback_plan(log) {
            let Some(path) = self.store.find_path(op.item_type, &op.item_id)? else {
                log::warn!("Cannot roll back {}: file not found", op.item_id);
                continue;
            };
            let patch = Patch::new().unset("state").unset("state_metadata");
            self.store
                .update(op.item_type, &path, &patch)
                .with_context(|| format!("Failed to roll back {}", op.item_id))?;
            rolled_back += 1;
        }
        self.index.rebuild_index()?;
        self.graph.rebuild_cache()?;
        Ok(rolled_back)
    }

    pub fn add_pr_dependency(
        &mut self,
        pr_id: &str,
        other_id: &str,
        kind: DependencyType,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<DependencyRecord> {
        self.graph.add_pr_dependency(pr_id, other_id, kind, reason, actor)
    }

    pub fn resolve_pr_dependency(&mut self, pr_id: &str, other_id: &str, actor: &str) -> Result<usize> {
        self.graph.resolve_pr_dependency(pr_id, other_id, actor)
    }

    pub fn remove_pr_dependency(&mut self, pr_id: &str, other_id: &str) -> Result<usize> {
        self.graph.remove_pr_dependency(pr_id, other_id)
    }

    pub fn check_mergeability(&self, pr_id: &str) -> Result<Mergeability> {
        self.graph.check_mergeability(pr_id)
    }

    pub fn sync_status(&self, pr_id: &str) -> Result<SyncStatus> {
        reconcile::sync_status(&self.graph, pr_id)
    }

    pub fn sync_pr(&mut self, pr_id: &str, options: &SyncOptions) -> Result<SyncReport> {
        reconcile::sync_pr(self, pr_id, options)
    }
}
