//! Derived index over the item files.
//!
//! The snapshot is a cache. It is persisted as JSON next to the config and
//! thrown away whenever the tree looks newer than it, so rebuilding from the
//! files is always the source of truth.

use crate::state::effective_state;
use crate::store::{ItemStore, ParseFailure, write_atomic};
use crate::types::{Item, ItemKind, Priority, State};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Index entry for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    /// Legacy status label as written in the file.
    pub status: String,
    /// Effective unified state.
    pub state: State,
    pub has_explicit_state: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub updated_date: DateTime<Utc>,
    pub file_path: PathBuf,
}

impl ItemSummary {
    pub fn from_item(item: &Item) -> Self {
        Self {
            id: item.id().to_string(),
            kind: item.kind(),
            title: item.header.title.clone(),
            status: item.status_label().to_string(),
            state: effective_state(item),
            has_explicit_state: item.header.state.is_some(),
            parent_id: item.parent().map(|(_, id)| id.to_string()),
            assignee: item.header.assignee.clone(),
            priority: item.header.priority,
            updated_date: item.header.updated_date,
            file_path: item.file_path.clone(),
        }
    }
}

/// Parseable items per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_epics: usize,
    pub total_issues: usize,
    pub total_tasks: usize,
    #[serde(rename = "totalPRs")]
    pub total_prs: usize,
}

impl IndexStats {
    pub fn count(&self, kind: ItemKind) -> usize {
        match kind {
            ItemKind::Epic => self.total_epics,
            ItemKind::Issue => self.total_issues,
            ItemKind::Task => self.total_tasks,
            ItemKind::Pr => self.total_prs,
        }
    }

    fn slot(&mut self, kind: ItemKind) -> &mut usize {
        match kind {
            ItemKind::Epic => &mut self.total_epics,
            ItemKind::Issue => &mut self.total_issues,
            ItemKind::Task => &mut self.total_tasks,
            ItemKind::Pr => &mut self.total_prs,
        }
    }

    pub fn total(&self) -> usize {
        self.total_epics + self.total_issues + self.total_tasks + self.total_prs
    }
}

/// The persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSnapshot {
    pub items: BTreeMap<String, ItemSummary>,
    pub stats: IndexStats,
    pub built_at: DateTime<Utc>,
    /// Every `*.md` file seen per kind, malformed ones included.
    #[serde(default)]
    pub file_counts: BTreeMap<ItemKind, usize>,
}

impl Default for IndexSnapshot {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            stats: IndexStats::default(),
            built_at: DateTime::<Utc>::UNIX_EPOCH,
            file_counts: BTreeMap::new(),
        }
    }
}

/// Why a persisted snapshot was not used.
#[derive(Debug, Clone, PartialEq)]
pub enum StaleReason {
    Missing,
    Unreadable(String),
    CountMismatch {
        kind: ItemKind,
        indexed: usize,
        on_disk: usize,
    },
    Modified(PathBuf),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::Missing => write!(f, "no persisted index"),
            StaleReason::Unreadable(msg) => write!(f, "persisted index unreadable: {}", msg),
            StaleReason::CountMismatch { kind, indexed, on_disk } => {
                write!(f, "{} count changed: indexed {}, on disk {}", kind, indexed, on_disk)
            }
            StaleReason::Modified(path) => write!(f, "{} modified after index was built", path.display()),
        }
    }
}

/// Where `load_index` got its data from.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadSource {
    Persisted,
    Rebuilt(StaleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildProgress {
    pub scanned: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
pub struct RebuildReport {
    pub indexed: usize,
    pub skipped: Vec<ParseFailure>,
    /// Set when the snapshot could not be written. The in-memory index is still valid.
    pub persist_error: Option<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexChange {
    Inserted,
    Updated,
    Removed,
    /// The file is gone and the index had no entry either.
    Absent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexUpdate {
    pub change: IndexChange,
    /// False when another file changed since the last build, leaving the snapshot stale.
    pub fresh: bool,
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectOverview {
    pub stats: IndexStats,
    pub total_items: usize,
    pub by_state: BTreeMap<State, usize>,
    pub completed_items: usize,
    /// Percentage of items in a finished state.
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexHealth {
    pub item_count: usize,
    pub snapshot_bytes: u64,
    pub built_at: DateTime<Utc>,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_reason: Option<String>,
    pub index_file: PathBuf,
}

/// Owns the in-memory snapshot for one invocation.
pub struct IndexEngine {
    store: ItemStore,
    snapshot: IndexSnapshot,
}

impl IndexEngine {
    /// Load the persisted index, rebuilding it if missing or stale.
    pub fn open(store: ItemStore) -> Result<Self> {
        let mut engine = Self {
            store,
            snapshot: IndexSnapshot::default(),
        };
        match engine.load_index()? {
            LoadSource::Persisted => log::debug!("Using persisted index"),
            LoadSource::Rebuilt(reason) => log::info!("Index rebuilt: {}", reason),
        }
        Ok(engine)
    }

    pub fn snapshot(&self) -> &IndexSnapshot {
        &self.snapshot
    }

    fn index_file(&self) -> &Path {
        &self.store.paths().index_file
    }

    pub fn rebuild_index(&mut self) -> Result<RebuildReport> {
        self.rebuild_index_with_progress(|_| {})
    }

    /// Scan every item directory and replace the snapshot.
    ///
    /// Files that fail to parse are skipped and listed in the report.
    pub fn rebuild_index_with_progress<F>(&mut self, mut progress: F) -> Result<RebuildReport>
    where
        F: FnMut(RebuildProgress),
    {
        let started = Instant::now();
        let built_at = Utc::now();

        let mut files = Vec::new();
        let mut file_counts = BTreeMap::new();
        for kind in ItemKind::ALL {
            let listed = self.store.list_files(kind)?;
            file_counts.insert(kind, listed.len());
            files.extend(listed.into_iter().map(|path| (kind, path)));
        }

        let total = files.len();
        let mut report = RebuildReport::default();
        let mut snapshot = IndexSnapshot {
            built_at,
            file_counts,
            ..Default::default()
        };

        for (scanned, (kind, path)) in files.into_iter().enumerate() {
            match self.store.parse(kind, &path) {
                Ok(item) if snapshot.items.contains_key(item.id()) => {
                    log::warn!("Skipping {}: duplicate id {}", path.display(), item.id());
                    report.skipped.push(ParseFailure {
                        kind,
                        path,
                        message: format!("duplicate id {}", item.id()),
                    });
                }
                Ok(item) => {
                    *snapshot.stats.slot(kind) += 1;
                    snapshot.items.insert(item.id().to_string(), ItemSummary::from_item(&item));
                }
                Err(e) => {
                    log::warn!("Skipping {} {}: {}", kind, path.display(), e);
                    report.skipped.push(ParseFailure {
                        kind,
                        path,
                        message: e.to_string(),
                    });
                }
            }
            progress(RebuildProgress {
                scanned: scanned + 1,
                total,
            });
        }

        report.indexed = snapshot.items.len();
        self.snapshot = snapshot;
        if let Err(e) = self.persist() {
            log::warn!("Failed to persist index: {:#}", e);
            report.persist_error = Some(format!("{:#}", e));
        }
        report.duration = started.elapsed();

        log::info!(
            "Index rebuilt: {} items, {} skipped in {:?}",
            report.indexed,
            report.skipped.len(),
            report.duration
        );
        Ok(report)
    }

    /// Use the persisted snapshot if it is still current, else rebuild.
    pub fn load_index(&mut self) -> Result<LoadSource> {
        let reason = match self.read_persisted() {
            Ok(Some(snapshot)) => match self.staleness(&snapshot)? {
                None => {
                    self.snapshot = snapshot;
                    return Ok(LoadSource::Persisted);
                }
                Some(reason) => reason,
            },
            Ok(None) => StaleReason::Missing,
            Err(e) => StaleReason::Unreadable(format!("{:#}", e)),
        };

        log::debug!("Index is stale ({}), rebuilding", reason);
        self.rebuild_index()?;
        Ok(LoadSource::Rebuilt(reason))
    }

    fn read_persisted(&self) -> Result<Option<IndexSnapshot>> {
        let path = self.index_file();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let snapshot =
            serde_json::from_slice(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(snapshot))
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot).context("Failed to serialize index")?;
        write_atomic(self.index_file(), &json)
    }

    /// Compare a snapshot against the tree: listing counts first, then mtimes.
    pub fn staleness(&self, snapshot: &IndexSnapshot) -> Result<Option<StaleReason>> {
        let mut listings = Vec::new();
        for kind in ItemKind::ALL {
            let files = self.store.list_files(kind)?;
            let indexed = snapshot.file_counts.get(&kind).copied().unwrap_or(0);
            if files.len() != indexed {
                return Ok(Some(StaleReason::CountMismatch {
                    kind,
                    indexed,
                    on_disk: files.len(),
                }));
            }
            listings.push((kind, files));
        }

        for (kind, files) in &listings {
            let dir = self.store.dir(*kind);
            if modified_at(dir).is_some_and(|t| t > snapshot.built_at) {
                return Ok(Some(StaleReason::Modified(dir.to_path_buf())));
            }
            if let Some(path) = files
                .iter()
                .find(|p| modified_at(p).is_some_and(|t| t > snapshot.built_at))
            {
                return Ok(Some(StaleReason::Modified(path.clone())));
            }
        }
        Ok(None)
    }

    /// Re-read one item and patch the snapshot in place.
    ///
    /// The recorded file count for `kind` moves by this change alone. The
    /// snapshot is only marked current when every listing still matches the
    /// recorded counts and nothing else in the tree is newer than the
    /// previous build.
    pub fn update_item(&mut self, kind: ItemKind, id: &str) -> Result<IndexUpdate> {
        let previous_built_at = self.snapshot.built_at;
        let recorded = self.snapshot.file_counts.get(&kind).copied().unwrap_or(0);
        let path = self.store.find_path(kind, id)?;

        let change = match &path {
            Some(path) => {
                let item = self.store.parse(kind, path)?;
                let summary = ItemSummary::from_item(&item);
                match self.snapshot.items.insert(id.to_string(), summary) {
                    Some(_) => IndexChange::Updated,
                    None => {
                        *self.snapshot.stats.slot(kind) += 1;
                        IndexChange::Inserted
                    }
                }
            }
            None => match self.snapshot.items.remove(id) {
                Some(old) => {
                    let slot = self.snapshot.stats.slot(old.kind);
                    *slot = slot.saturating_sub(1);
                    IndexChange::Removed
                }
                None => IndexChange::Absent,
            },
        };

        let expected = match change {
            IndexChange::Inserted => recorded + 1,
            IndexChange::Removed => recorded.saturating_sub(1),
            IndexChange::Updated | IndexChange::Absent => recorded,
        };
        self.snapshot.file_counts.insert(kind, expected);

        let fresh = match self.tree_drift(kind, previous_built_at, path.as_deref())? {
            None => {
                self.snapshot.built_at = Utc::now();
                true
            }
            Some(reason) => {
                log::debug!("Index left stale after updating {}: {}", id, reason);
                false
            }
        };

        let persist_error = match self.persist() {
            Ok(()) => None,
            Err(e) => {
                log::warn!("Failed to persist index: {:#}", e);
                Some(format!("{:#}", e))
            }
        };
        log::debug!("Index update for {} {}: {:?}", kind, id, change);
        Ok(IndexUpdate {
            change,
            fresh,
            persist_error,
        })
    }

    /// Anything on disk the snapshot does not account for after a single-item update.
    ///
    /// The directory of `written` is skipped for the mtime check since the
    /// update's own rename touches it; its listing count still has to match.
    fn tree_drift(
        &self,
        written: ItemKind,
        since: DateTime<Utc>,
        except: Option<&Path>,
    ) -> Result<Option<StaleReason>> {
        for kind in ItemKind::ALL {
            let files = self.store.list_files(kind)?;
            let indexed = self.snapshot.file_counts.get(&kind).copied().unwrap_or(0);
            if files.len() != indexed {
                return Ok(Some(StaleReason::CountMismatch {
                    kind,
                    indexed,
                    on_disk: files.len(),
                }));
            }
            let dir = self.store.dir(kind);
            if kind != written && modified_at(dir).is_some_and(|t| t > since) {
                return Ok(Some(StaleReason::Modified(dir.to_path_buf())));
            }
            if let Some(file) = files
                .iter()
                .filter(|f| Some(f.as_path()) != except)
                .find(|f| modified_at(f).is_some_and(|t| t > since))
            {
                return Ok(Some(StaleReason::Modified(file.clone())));
            }
        }
        Ok(None)
    }

    pub fn get_item(&self, id: &str) -> Option<&ItemSummary> {
        self.snapshot.items.get(id)
    }

    /// Items whose legacy status or effective state matches `status`.
    pub fn get_items_by_status(&self, status: &str) -> Vec<&ItemSummary> {
        self.snapshot
            .items
            .values()
            .filter(|s| s.status == status || s.state.as_str() == status)
            .collect()
    }

    pub fn get_items_by_type(&self, kind: ItemKind) -> Vec<&ItemSummary> {
        self.snapshot.items.values().filter(|s| s.kind == kind).collect()
    }

    pub fn all_items(&self) -> impl Iterator<Item = &ItemSummary> {
        self.snapshot.items.values()
    }

    pub fn get_project_overview(&self) -> ProjectOverview {
        let mut by_state: BTreeMap<State, usize> = BTreeMap::new();
        for summary in self.snapshot.items.values() {
            *by_state.entry(summary.state).or_insert(0) += 1;
        }
        let total_items = self.snapshot.items.len();
        let completed_items: usize = by_state
            .iter()
            .filter(|(state, _)| state.is_finished())
            .map(|(_, n)| n)
            .sum();
        let completion_rate = if total_items == 0 {
            0.0
        } else {
            completed_items as f64 * 100.0 / total_items as f64
        };

        ProjectOverview {
            stats: self.snapshot.stats,
            total_items,
            by_state,
            completed_items,
            completion_rate,
        }
    }

    pub fn get_index_stats(&self) -> Result<IndexHealth> {
        let index_file = self.index_file().to_path_buf();
        let snapshot_bytes = fs::metadata(&index_file).map(|m| m.len()).unwrap_or(0);
        let stale_reason = if snapshot_bytes == 0 {
            Some(StaleReason::Missing)
        } else {
            self.staleness(&self.snapshot)?
        };

        Ok(IndexHealth {
            item_count: self.snapshot.items.len(),
            snapshot_bytes,
            built_at: self.snapshot.built_at,
            healthy: stale_reason.is_none(),
            stale_reason: stale_reason.map(|r| r.to_string()),
            index_file,
        })
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}
