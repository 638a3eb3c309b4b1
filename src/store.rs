//! Item store: one Markdown file with YAML frontmatter per item.
//!
//! Every write goes to a temporary file in the target directory and is then
//! renamed into place, so readers never observe a half-written item.

use crate::config::{IdPrefixes, ProjectConfig, ProjectPaths};
use crate::error::{Error, ValidationError};
use crate::frontmatter;
use crate::id::{format_id, id_from_file_name, parse_id, slugify};
use crate::types::{Item, ItemKind};
use chrono::Utc;
use eyre::{Context, Result};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A file that could not be turned into an item during a bulk load.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub kind: ItemKind,
    pub path: PathBuf,
    pub message: String,
}

/// Result of loading every file of one kind.
#[derive(Debug, Default)]
pub struct LoadedItems {
    pub items: Vec<Item>,
    pub failures: Vec<ParseFailure>,
}

/// Partial frontmatter fields for `ItemStore::update`.
///
/// Keys are merged shallowly; a null value removes the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: Mapping,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. `None` values remove the field.
    pub fn set<V: Serialize>(mut self, key: &str, value: V) -> Result<Self> {
        let value = serde_yaml::to_value(value).with_context(|| format!("Failed to serialize field '{}'", key))?;
        self.fields.insert(Value::String(key.to_string()), value);
        Ok(self)
    }

    /// Remove a field.
    pub fn unset(mut self, key: &str) -> Self {
        self.fields.insert(Value::String(key.to_string()), Value::Null);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// File-backed item storage for one project.
#[derive(Debug, Clone)]
pub struct ItemStore {
    paths: ProjectPaths,
    prefixes: IdPrefixes,
    id_width: usize,
}

impl ItemStore {
    pub fn new(config: &ProjectConfig, root: &Path) -> Self {
        Self {
            paths: config.resolve(root),
            prefixes: config.prefixes.clone(),
            id_width: config.id_width,
        }
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn dir(&self, kind: ItemKind) -> &Path {
        self.paths.dir(kind)
    }

    /// Create the four item directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for kind in ItemKind::ALL {
            let dir = self.dir(kind);
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// All item files of one kind, sorted by path. A missing directory is empty.
    pub fn list_files(&self, kind: ItemKind) -> Result<Vec<PathBuf>> {
        let dir = self.dir(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
            let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
            let path = entry.path();
            if is_item_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Parse one item file.
    pub fn parse(&self, kind: ItemKind, path: &Path) -> Result<Item> {
        let content = fs::read_to_string(path).map_err(|e| {
            eyre::eyre!(Error::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        })?;
        let parse_error = |message: String| {
            eyre::eyre!(Error::Parse {
                path: path.to_path_buf(),
                message,
            })
        };

        let doc = frontmatter::parse(&content).map_err(|e| parse_error(e.to_string()))?;
        let item = frontmatter::decode_item(kind, doc, path).map_err(|e| parse_error(e.to_string()))?;
        item.validate().map_err(|e| parse_error(e.to_string()))?;
        Ok(item)
    }

    /// Parse every file of one kind, collecting failures instead of aborting.
    pub fn load_all(&self, kind: ItemKind) -> Result<LoadedItems> {
        let mut loaded = LoadedItems::default();
        for path in self.list_files(kind)? {
            match self.parse(kind, &path) {
                Ok(item) => loaded.items.push(item),
                Err(e) => {
                    log::warn!("Skipping {} {}: {}", kind, path.display(), e);
                    loaded.failures.push(ParseFailure {
                        kind,
                        path,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(loaded)
    }

    /// Locate the file holding `id`.
    ///
    /// Files named `{ID}-slug.md` are matched by name; otherwise every file of
    /// the kind is parsed and compared.
    pub fn find_path(&self, kind: ItemKind, id: &str) -> Result<Option<PathBuf>> {
        let files = self.list_files(kind)?;
        let by_name = files.iter().find(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(id_from_file_name)
                .is_some_and(|file_id| file_id == id)
        });
        if let Some(path) = by_name {
            return Ok(Some(path.clone()));
        }

        Ok(files.into_iter().find(|path| {
            self.parse(kind, path)
                .map(|item| item.header.id == id)
                .unwrap_or(false)
        }))
    }

    /// Load one item by id.
    pub fn load(&self, kind: ItemKind, id: &str) -> Result<Item> {
        let path = self
            .find_path(kind, id)?
            .ok_or_else(|| eyre::eyre!(Error::not_found(kind, id)))?;
        self.parse(kind, &path)
    }

    /// Write an item to its `file_path`.
    pub fn write(&self, item: &Item) -> Result<()> {
        item.validate().map_err(|e| eyre::eyre!(Error::Validation(e)))?;
        let content = frontmatter::encode_item(item).context("Failed to encode item")?;
        write_atomic(&item.file_path, content.as_bytes())
    }

    /// Merge `patch` into the frontmatter at `path`, stamping `updated_date`
    /// and bumping `revision`. Nothing is written if the result is invalid.
    pub fn update(&self, kind: ItemKind, path: &Path, patch: &Patch) -> Result<Item> {
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let doc = frontmatter::parse(&content).map_err(|e| {
            eyre::eyre!(Error::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        })?;

        let mut fields = doc.frontmatter;
        for (key, value) in &patch.fields {
            if value.is_null() {
                fields.remove(key);
            } else {
                fields.insert(key.clone(), value.clone());
            }
        }
        let revision = fields.get("revision").and_then(Value::as_u64).unwrap_or(0) + 1;
        fields.insert(
            Value::String("updated_date".to_string()),
            Value::String(Utc::now().to_rfc3339()),
        );
        fields.insert(Value::String("revision".to_string()), Value::from(revision));

        let merged = frontmatter::Document {
            frontmatter: fields,
            body: doc.body,
        };
        let item = frontmatter::decode_item(kind, merged.clone(), path).map_err(|e| {
            eyre::eyre!(Error::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        })?;
        item.validate().map_err(|e| eyre::eyre!(Error::Validation(e)))?;

        let rendered = frontmatter::render(&merged.frontmatter, &merged.body).context("Failed to render item")?;
        write_atomic(path, rendered.as_bytes())?;
        Ok(item)
    }

    /// Store a new item, allocating an id when the header has none.
    pub fn create(&self, mut item: Item) -> Result<Item> {
        let kind = item.kind();
        if item.header.id.is_empty() {
            item.header.id = self.next_id(kind)?;
        } else if self.find_path(kind, &item.header.id)?.is_some() {
            return Err(eyre::eyre!(Error::Validation(ValidationError::DuplicateId(
                item.header.id.clone()
            ))));
        }
        let now = Utc::now();
        item.header.created_date = now;
        item.header.updated_date = now;
        item.file_path = self
            .dir(kind)
            .join(format!("{}-{}.md", item.header.id, slugify(&item.header.title)));

        self.write(&item).with_context(|| format!("Failed to create {}", item.header.id))?;
        Ok(item)
    }

    /// Next free id for a kind, one past the highest numbered file.
    pub fn next_id(&self, kind: ItemKind) -> Result<String> {
        let prefix = self.prefixes.for_kind(kind);
        let highest = self
            .list_files(kind)?
            .iter()
            .filter_map(|path| path.file_name().and_then(|n| n.to_str()))
            .filter_map(id_from_file_name)
            .filter_map(parse_id)
            .filter(|(p, _)| *p == prefix)
            .map(|(_, n)| n)
            .max()
            .unwrap_or(0);
        Ok(format_id(prefix, highest + 1, self.id_width))
    }

    /// Remove an item's file, returning the path that was deleted.
    pub fn delete(&self, kind: ItemKind, id: &str) -> Result<PathBuf> {
        let path = self
            .find_path(kind, id)?
            .ok_or_else(|| eyre::eyre!(Error::not_found(kind, id)))?;
        fs::remove_file(&path).with_context(|| format!("Failed to delete {}", path.display()))?;
        Ok(path)
    }
}

fn is_item_file(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.'));
    visible && path.is_file() && path.extension().is_some_and(|ext| ext == "md")
}

/// Write through a temp file and rename into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(contents).context("Failed to write temp file")?;
        file.sync_all().context("Failed to sync temp file")?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to move into place: {}", path.display()))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
