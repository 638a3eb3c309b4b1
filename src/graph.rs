//! Relationship graph: hierarchy and dependency queries over all items.
//!
//! The graph is an in-memory copy of the item files plus the PR dependency
//! records. Call `rebuild_cache` after any change to the file tree before
//! trusting further answers.

use crate::deps::{DependencyGraph, DependencyRecord, DependencyStore, DependencyType};
use crate::error::{Error, ValidationError};
use crate::store::{ItemStore, ParseFailure};
use crate::types::{Item, ItemDetail, ItemKind, PrStatus};
use chrono::Utc;
use eyre::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// A parent referenced by some item but absent from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placeholder {
    pub id: String,
    pub kind: ItemKind,
    pub referenced_by: Vec<String>,
}

/// How an ancestor reference resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum ParentRef {
    Resolved { item: Box<Item> },
    Placeholder { placeholder: Placeholder },
    None,
}

impl ParentRef {
    pub fn item(&self) -> Option<&Item> {
        match self {
            ParentRef::Resolved { item } => Some(item.as_ref()),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ParentRef::Resolved { item } => Some(item.id()),
            ParentRef::Placeholder { placeholder } => Some(&placeholder.id),
            ParentRef::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueBranch {
    pub issue: Item,
    pub tasks: Vec<Item>,
    pub prs: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicHierarchy {
    pub epic: Item,
    pub issues: Vec<IssueBranch>,
    /// PRs attached to the epic without an issue.
    pub prs: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueHierarchy {
    pub issue: Item,
    pub epic: ParentRef,
    pub tasks: Vec<Item>,
    pub prs: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrHierarchy {
    pub pr: Item,
    pub issue: ParentRef,
    pub epic: ParentRef,
    pub tasks: Vec<Item>,
    pub depends_on: Vec<String>,
    pub dependents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RelatedItems {
    pub siblings: Vec<String>,
    /// Items linked through `related_*` fields, in either direction.
    pub linked: Vec<String>,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mergeability {
    pub pr_id: String,
    pub can_merge: bool,
    pub blocked_by: Vec<String>,
    /// One line per dependency, including merged or closed ones that no
    /// longer hold the PR back.
    pub blocking_reasons: Vec<String>,
}

/// Outcome of `rebuild_cache`.
#[derive(Debug, Default)]
pub struct CacheReport {
    pub loaded: usize,
    pub skipped: Vec<ParseFailure>,
    pub placeholders: usize,
}

/// In-memory relationship graph for one invocation.
pub struct RelationshipGraph {
    store: ItemStore,
    deps: DependencyStore,
    items: BTreeMap<String, Item>,
    records: Vec<DependencyRecord>,
    placeholders: BTreeMap<String, Placeholder>,
    waits_on: DependencyGraph,
}

impl RelationshipGraph {
    /// Build the graph from the current file tree.
    pub fn load(store: ItemStore) -> Result<Self> {
        let deps = DependencyStore::new(store.paths().dependencies_file.clone());
        let mut graph = Self {
            store,
            deps,
            items: BTreeMap::new(),
            records: Vec::new(),
            placeholders: BTreeMap::new(),
            waits_on: DependencyGraph::new(),
        };
        graph.rebuild_cache()?;
        Ok(graph)
    }

    /// Re-read every item file and the dependency records.
    pub fn rebuild_cache(&mut self) -> Result<CacheReport> {
        let mut report = CacheReport::default();
        let mut items: BTreeMap<String, Item> = BTreeMap::new();

        for kind in ItemKind::ALL {
            let loaded = self.store.load_all(kind)?;
            report.skipped.extend(loaded.failures);
            for item in loaded.items {
                if let Some(existing) = items.get(item.id()) {
                    log::warn!(
                        "Duplicate id {}: keeping {}, ignoring {}",
                        item.id(),
                        existing.file_path.display(),
                        item.file_path.display()
                    );
                    continue;
                }
                items.insert(item.id().to_string(), item);
            }
        }

        derive_task_epics(&mut items);
        self.items = items;
        self.records = self.deps.load().context("Failed to load PR dependencies")?;
        self.placeholders = self.collect_placeholders();
        self.waits_on = self.build_waits_on();

        report.loaded = self.items.len();
        report.placeholders = self.placeholders.len();
        log::debug!(
            "Relationship cache rebuilt: {} items, {} dependency records, {} placeholders",
            report.loaded,
            self.records.len(),
            report.placeholders
        );
        Ok(report)
    }

    fn collect_placeholders(&self) -> BTreeMap<String, Placeholder> {
        let mut placeholders: BTreeMap<String, Placeholder> = BTreeMap::new();
        for item in self.items.values() {
            let Some((parent_kind, parent_id)) = item.parent() else {
                continue;
            };
            let resolved = self.items.get(parent_id).is_some_and(|p| p.kind() == parent_kind);
            if resolved {
                continue;
            }
            log::warn!("{} references missing {} {}", item.id(), parent_kind, parent_id);
            placeholders
                .entry(parent_id.to_string())
                .or_insert_with(|| Placeholder {
                    id: parent_id.to_string(),
                    kind: parent_kind,
                    referenced_by: Vec::new(),
                })
                .referenced_by
                .push(item.id().to_string());
        }
        placeholders
    }

    fn build_waits_on(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for item in self.items.values() {
            for dep in item.declared_dependencies() {
                graph.add_edge(item.id(), dep);
            }
            for blocked in item.declared_blocks() {
                graph.add_edge(blocked, item.id());
            }
        }
        for record in self.records.iter().filter(|r| !r.resolved) {
            let (from, to) = record.waits_on_edge();
            graph.add_edge(from, to);
        }
        graph
    }

    /// The PR-only "waits on" graph used for cycle checks and mergeability.
    pub fn pr_dependency_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for pr in self.items.values().filter(|i| i.kind() == ItemKind::Pr) {
            for dep in pr.declared_dependencies() {
                graph.add_edge(pr.id(), dep);
            }
            for blocked in pr.declared_blocks() {
                graph.add_edge(blocked, pr.id());
            }
        }
        for record in self.records.iter().filter(|r| !r.resolved) {
            let (from, to) = record.waits_on_edge();
            graph.add_edge(from, to);
        }
        graph
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    fn get_kind(&self, kind: ItemKind, id: &str) -> Result<&Item> {
        match self.items.get(id) {
            Some(item) if item.kind() == kind => Ok(item),
            _ => Err(eyre::eyre!(Error::not_found(kind, id))),
        }
    }

    fn require_pr(&self, id: &str) -> Result<&Item> {
        match self.items.get(id) {
            Some(item) if item.kind() == ItemKind::Pr => Ok(item),
            Some(item) => Err(eyre::eyre!(Error::Validation(ValidationError::WrongKind {
                id: id.to_string(),
                expected: ItemKind::Pr,
                actual: item.kind(),
            }))),
            None => Err(eyre::eyre!(Error::not_found(ItemKind::Pr, id))),
        }
    }

    fn all_of(&self, kind: ItemKind) -> Vec<&Item> {
        self.items.values().filter(|i| i.kind() == kind).collect()
    }

    pub fn get_all_epics(&self) -> Vec<&Item> {
        self.all_of(ItemKind::Epic)
    }

    pub fn get_all_issues(&self) -> Vec<&Item> {
        self.all_of(ItemKind::Issue)
    }

    pub fn get_all_tasks(&self) -> Vec<&Item> {
        self.all_of(ItemKind::Task)
    }

    pub fn get_all_prs(&self) -> Vec<&Item> {
        self.all_of(ItemKind::Pr)
    }

    /// Parents that are referenced but missing from the store.
    pub fn placeholders(&self) -> Vec<&Placeholder> {
        self.placeholders.values().collect()
    }

    /// Dangling parent references as validation errors.
    pub fn reference_problems(&self) -> Vec<ValidationError> {
        let mut problems = Vec::new();
        for placeholder in self.placeholders.values() {
            let field = match placeholder.kind {
                ItemKind::Epic => "epic_id",
                _ => "issue_id",
            };
            for referrer in &placeholder.referenced_by {
                problems.push(ValidationError::DanglingReference {
                    item_id: referrer.clone(),
                    field,
                    target_id: placeholder.id.clone(),
                });
            }
        }
        problems
    }

    pub fn dependency_records(&self) -> &[DependencyRecord] {
        &self.records
    }

    fn resolve_parent(&self, kind: ItemKind, id: Option<&str>) -> ParentRef {
        let Some(id) = id else {
            return ParentRef::None;
        };
        match self.items.get(id) {
            Some(item) if item.kind() == kind => ParentRef::Resolved {
                item: Box::new(item.clone()),
            },
            _ => ParentRef::Placeholder {
                placeholder: self.placeholders.get(id).cloned().unwrap_or_else(|| Placeholder {
                    id: id.to_string(),
                    kind,
                    referenced_by: Vec::new(),
                }),
            },
        }
    }

    fn tasks_of_issue(&self, issue: &Item) -> Vec<Item> {
        let listed: &[String] = match &issue.detail {
            ItemDetail::Issue(d) => &d.related_tasks,
            _ => &[],
        };
        self.items
            .values()
            .filter(|i| match &i.detail {
                ItemDetail::Task(t) => t.issue_id == issue.id() || listed.contains(&i.header.id),
                _ => false,
            })
            .cloned()
            .collect()
    }

    fn prs_of_issue(&self, issue: &Item) -> Vec<Item> {
        let listed: &[String] = match &issue.detail {
            ItemDetail::Issue(d) => &d.related_prs,
            _ => &[],
        };
        self.items
            .values()
            .filter(|i| match &i.detail {
                ItemDetail::Pr(p) => p.issue_id.as_deref() == Some(issue.id()) || listed.contains(&i.header.id),
                _ => false,
            })
            .cloned()
            .collect()
    }

    pub fn get_epic_hierarchy(&self, epic_id: &str) -> Result<EpicHierarchy> {
        let epic = self.get_kind(ItemKind::Epic, epic_id)?;
        let listed: &[String] = match &epic.detail {
            ItemDetail::Epic(d) => &d.related_issues,
            _ => &[],
        };

        let issues = self
            .items
            .values()
            .filter(|i| match &i.detail {
                ItemDetail::Issue(d) => d.epic_id.as_deref() == Some(epic_id) || listed.contains(&i.header.id),
                _ => false,
            })
            .map(|issue| IssueBranch {
                issue: issue.clone(),
                tasks: self.tasks_of_issue(issue),
                prs: self.prs_of_issue(issue),
            })
            .collect();

        let prs = self
            .items
            .values()
            .filter(|i| match &i.detail {
                ItemDetail::Pr(p) => p.issue_id.is_none() && p.epic_id.as_deref() == Some(epic_id),
                _ => false,
            })
            .cloned()
            .collect();

        Ok(EpicHierarchy {
            epic: epic.clone(),
            issues,
            prs,
        })
    }

    pub fn get_issue_hierarchy(&self, issue_id: &str) -> Result<IssueHierarchy> {
        let issue = self.get_kind(ItemKind::Issue, issue_id)?;
        let epic_id = match &issue.detail {
            ItemDetail::Issue(d) => d.epic_id.as_deref(),
            _ => None,
        };
        Ok(IssueHierarchy {
            issue: issue.clone(),
            epic: self.resolve_parent(ItemKind::Epic, epic_id),
            tasks: self.tasks_of_issue(issue),
            prs: self.prs_of_issue(issue),
        })
    }

    pub fn get_pr_hierarchy(&self, pr_id: &str) -> Result<PrHierarchy> {
        let pr = self.get_kind(ItemKind::Pr, pr_id)?;
        let ItemDetail::Pr(detail) = &pr.detail else {
            return Err(eyre::eyre!(Error::not_found(ItemKind::Pr, pr_id)));
        };

        let issue = self.resolve_parent(ItemKind::Issue, detail.issue_id.as_deref());
        let epic_id = detail.epic_id.clone().or_else(|| match issue.item().map(|i| &i.detail) {
            Some(ItemDetail::Issue(d)) => d.epic_id.clone(),
            _ => None,
        });
        let graph = self.pr_dependency_graph();

        Ok(PrHierarchy {
            pr: pr.clone(),
            issue,
            epic: self.resolve_parent(ItemKind::Epic, epic_id.as_deref()),
            tasks: self.linked_tasks(pr_id).into_iter().cloned().collect(),
            depends_on: graph.waits_on(pr_id),
            dependents: graph.waited_on_by(pr_id),
        })
    }

    /// Tasks a PR closes: listed on the PR, or listing the PR themselves.
    pub fn linked_tasks(&self, pr_id: &str) -> Vec<&Item> {
        let listed: Vec<&str> = match self.items.get(pr_id).map(|p| &p.detail) {
            Some(ItemDetail::Pr(d)) => d.related_tasks.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        };
        for id in &listed {
            if !self.items.get(*id).is_some_and(|i| i.kind() == ItemKind::Task) {
                log::warn!("{} lists unknown task {}", pr_id, id);
            }
        }
        self.items
            .values()
            .filter(|i| match &i.detail {
                ItemDetail::Task(t) => listed.contains(&i.id()) || t.related_prs.iter().any(|p| p == pr_id),
                _ => false,
            })
            .collect()
    }

    /// Siblings, linked items, dependencies and dependents of any item.
    pub fn get_related_items(&self, id: &str) -> Result<RelatedItems> {
        let item = self
            .items
            .get(id)
            .ok_or_else(|| eyre::eyre!(Error::NotFound { kind: None, id: id.to_string() }))?;

        let siblings = match item.parent() {
            Some((_, parent_id)) => self
                .items
                .values()
                .filter(|other| {
                    other.kind() == item.kind() && other.id() != id && other.parent().map(|(_, p)| p) == Some(parent_id)
                })
                .map(|other| other.id().to_string())
                .collect(),
            None => Vec::new(),
        };

        let mut linked: Vec<String> = item
            .related_links()
            .into_iter()
            .chain(
                self.items
                    .values()
                    .filter(|other| other.related_links().contains(&id))
                    .map(Item::id),
            )
            .filter(|other| *other != id)
            .map(str::to_string)
            .collect();
        linked.sort();
        linked.dedup();

        Ok(RelatedItems {
            siblings,
            linked,
            dependencies: self.waits_on.waits_on(id),
            dependents: self.waits_on.waited_on_by(id),
        })
    }

    /// Cycles currently present in the PR dependency graph.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        self.pr_dependency_graph().detect_cycles()
    }

    /// Record that `pr_id` relates to `other_id`. Rejected before anything is
    /// written if either PR is unknown or the edge would close a cycle.
    pub fn add_pr_dependency(
        &mut self,
        pr_id: &str,
        other_id: &str,
        kind: DependencyType,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<DependencyRecord> {
        if pr_id == other_id {
            return Err(eyre::eyre!(Error::Validation(ValidationError::SelfDependency(
                pr_id.to_string()
            ))));
        }
        self.require_pr(pr_id)?;
        self.require_pr(other_id)?;

        let record = DependencyRecord {
            pr_id: pr_id.to_string(),
            dependent_pr_id: other_id.to_string(),
            kind,
            reason: reason.map(String::from),
            created: Utc::now(),
            created_by: actor.to_string(),
            resolved: false,
            resolved_by: None,
        };

        if let Some(existing) = self.records.iter().find(|r| !r.resolved && r.same_edge(&record)) {
            return Ok(existing.clone());
        }

        let (from, to) = record.waits_on_edge();
        if let Some(path) = self.pr_dependency_graph().cycle_with_edge(from, to) {
            return Err(eyre::eyre!(Error::Validation(ValidationError::CycleDetected { path })));
        }

        let mut records = self.records.clone();
        records.push(record.clone());
        self.deps.save(&records).context("Failed to persist PR dependency")?;
        self.records = records;
        self.waits_on = self.build_waits_on();
        log::info!("Added dependency {} -> {} ({:?})", from, to, kind);
        Ok(record)
    }

    /// Mark every unresolved record between two PRs as resolved.
    pub fn resolve_pr_dependency(&mut self, pr_id: &str, other_id: &str, actor: &str) -> Result<usize> {
        let mut records = self.records.clone();
        let mut resolved = 0;
        for record in records.iter_mut().filter(|r| !r.resolved) {
            let ends = (record.pr_id.as_str(), record.dependent_pr_id.as_str());
            if ends == (pr_id, other_id) || ends == (other_id, pr_id) {
                record.resolved = true;
                record.resolved_by = Some(actor.to_string());
                resolved += 1;
            }
        }
        if resolved == 0 {
            return Err(eyre::eyre!(Error::NotFound {
                kind: None,
                id: format!("{} <-> {}", pr_id, other_id),
            }));
        }
        self.deps.save(&records).context("Failed to persist PR dependency")?;
        self.records = records;
        self.waits_on = self.build_waits_on();
        Ok(resolved)
    }

    /// Delete every record between two PRs.
    pub fn remove_pr_dependency(&mut self, pr_id: &str, other_id: &str) -> Result<usize> {
        let before = self.records.len();
        let records: Vec<DependencyRecord> = self
            .records
            .iter()
            .filter(|r| {
                let ends = (r.pr_id.as_str(), r.dependent_pr_id.as_str());
                ends != (pr_id, other_id) && ends != (other_id, pr_id)
            })
            .cloned()
            .collect();
        let removed = before - records.len();
        if removed > 0 {
            self.deps.save(&records).context("Failed to persist PR dependency")?;
            self.records = records;
            self.waits_on = self.build_waits_on();
        }
        Ok(removed)
    }

    /// A PR can merge once nothing it waits on is still outstanding.
    pub fn check_mergeability(&self, pr_id: &str) -> Result<Mergeability> {
        self.get_kind(ItemKind::Pr, pr_id)?;

        let mut blocked_by = Vec::new();
        let mut blocking_reasons = Vec::new();
        for blocker in self.pr_dependency_graph().waits_on(pr_id) {
            match self.items.get(&blocker).map(|i| &i.detail) {
                Some(ItemDetail::Pr(d)) if d.pr_status == PrStatus::Merged => {
                    blocking_reasons.push(format!("Depends on {} (already merged)", blocker));
                }
                Some(ItemDetail::Pr(d)) if d.pr_status == PrStatus::Closed => {
                    blocking_reasons.push(format!("Depends on {} (already closed)", blocker));
                }
                Some(ItemDetail::Pr(d)) => {
                    blocking_reasons.push(format!("Blocked by {} ({})", blocker, d.pr_status));
                    blocked_by.push(blocker);
                }
                _ => {
                    blocking_reasons.push(format!("Blocked by {} (not found)", blocker));
                    blocked_by.push(blocker);
                }
            }
        }

        Ok(Mergeability {
            pr_id: pr_id.to_string(),
            can_merge: blocked_by.is_empty(),
            blocked_by,
            blocking_reasons,
        })
    }
}

/// Fill each task's `epic_id` from its issue when the file leaves it out.
fn derive_task_epics(items: &mut BTreeMap<String, Item>) {
    let issue_epics: BTreeMap<String, String> = items
        .values()
        .filter_map(|i| match &i.detail {
            ItemDetail::Issue(d) => d.epic_id.clone().map(|epic| (i.id().to_string(), epic)),
            _ => None,
        })
        .collect();

    for item in items.values_mut() {
        if let ItemDetail::Task(task) = &mut item.detail
            && task.epic_id.is_none()
        {
            task.epic_id = issue_epics.get(&task.issue_id).cloned();
        }
    }
}
