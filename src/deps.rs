//! PR dependency records and the directed "waits on" graph.

use crate::store::write_atomic;
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How two PRs relate in a dependency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// `pr_id` blocks `dependent_pr_id`.
    Blocks,
    /// `pr_id` depends on `dependent_pr_id`.
    DependsOn,
    /// `pr_id` is required by `dependent_pr_id`.
    RequiredBy,
    /// `pr_id` is blocked by `dependent_pr_id`.
    BlockedBy,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Blocks => "blocks",
            DependencyType::DependsOn => "depends_on",
            DependencyType::RequiredBy => "required_by",
            DependencyType::BlockedBy => "blocked_by",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "blocks" => Ok(DependencyType::Blocks),
            "depends_on" => Ok(DependencyType::DependsOn),
            "required_by" => Ok(DependencyType::RequiredBy),
            "blocked_by" => Ok(DependencyType::BlockedBy),
            other => Err(format!("unknown dependency type '{}'", other)),
        }
    }
}

/// One persisted dependency between two PRs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRecord {
    pub pr_id: String,
    pub dependent_pr_id: String,
    #[serde(rename = "type")]
    pub kind: DependencyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created: DateTime<Utc>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl DependencyRecord {
    /// The edge as `(waiting, waited_on)`.
    pub fn waits_on_edge(&self) -> (&str, &str) {
        match self.kind {
            DependencyType::DependsOn | DependencyType::BlockedBy => (&self.pr_id, &self.dependent_pr_id),
            DependencyType::Blocks | DependencyType::RequiredBy => (&self.dependent_pr_id, &self.pr_id),
        }
    }

    /// Two records describe the same constraint.
    pub fn same_edge(&self, other: &DependencyRecord) -> bool {
        self.waits_on_edge() == other.waits_on_edge()
    }
}

/// The JSON file holding dependency records.
#[derive(Debug, Clone)]
pub struct DependencyStore {
    path: PathBuf,
}

impl DependencyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records. A missing file holds no records.
    pub fn load(&self) -> Result<Vec<DependencyRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content =
            fs::read_to_string(&self.path).with_context(|| format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    pub fn save(&self, records: &[DependencyRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(records).context("Failed to serialize dependency records")?;
        write_atomic(&self.path, json.as_bytes())
    }
}

/// Directed graph where an edge `a -> b` means `a` waits on `b`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.edges.entry(to.to_string()).or_default();
        self.edges.entry(from.to_string()).or_default().insert(to.to_string());
    }

    pub fn contains_edge(&self, from: &str, to: &str) -> bool {
        self.edges.get(from).is_some_and(|targets| targets.contains(to))
    }

    /// Nodes `id` waits on directly.
    pub fn waits_on(&self, id: &str) -> Vec<String> {
        self.edges
            .get(id)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Nodes waiting directly on `id`.
    pub fn waited_on_by(&self, id: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, targets)| targets.contains(id))
            .map(|(from, _)| from.clone())
            .collect()
    }

    /// First cycle found by depth-first search, as the ordered list of ids.
    ///
    /// Nodes and neighbours are visited in sorted order.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        self.detect_cycles().into_iter().next()
    }

    /// Every cycle reachable by DFS with a recursion stack. A node revisited
    /// while still on the stack closes a cycle.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();
        for node in self.edges.keys() {
            if !visited.contains(node.as_str()) {
                self.visit(node, &mut visited, &mut stack, &mut cycles);
            }
        }
        cycles
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        visited: &mut BTreeSet<&'a str>,
        stack: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node);
        stack.push(node);
        if let Some(targets) = self.edges.get(node) {
            for next in targets {
                if let Some(pos) = stack.iter().position(|n| *n == next.as_str()) {
                    cycles.push(stack[pos..].iter().map(|s| s.to_string()).collect());
                } else if !visited.contains(next.as_str()) {
                    self.visit(next, visited, stack, cycles);
                }
            }
        }
        stack.pop();
    }

    /// Path from `from` to `to` following edges, if one exists.
    pub fn path_between(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut path = Vec::new();
        if self.walk(from, to, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn walk<'a>(&'a self, node: &'a str, goal: &str, visited: &mut BTreeSet<&'a str>, path: &mut Vec<String>) -> bool {
        if !visited.insert(node) {
            return false;
        }
        path.push(node.to_string());
        if node == goal {
            return true;
        }
        if let Some(targets) = self.edges.get(node) {
            for next in targets {
                if self.walk(next, goal, visited, path) {
                    return true;
                }
            }
        }
        path.pop();
        false
    }

    /// The cycle that adding `from -> to` would close, if any.
    ///
    /// The cycle runs from `to` back round to `from`, e.g. with `A -> B -> C`
    /// in place, adding `C -> A` yields `[A, B, C]`.
    pub fn cycle_with_edge(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let mut hypothetical = self.clone();
        hypothetical.add_edge(from, to);
        hypothetical.path_between(to, from)
    }
}
