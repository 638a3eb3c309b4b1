//! Shared test infrastructure for workplan integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use workplan::{Item, ItemKind, PrStatus, Project, ProjectBuilderExt, Status};

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub project: Project,
}

impl TestEnv {
    /// Create a new test environment with an initialized project.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let project = Project::init(temp_dir.path()).expect("Failed to init project");
        Self { temp_dir, project }
    }

    /// Reopen the project from disk, as a fresh invocation would.
    pub fn reopen(&mut self) {
        self.project = Project::open(self.temp_dir.path()).expect("Failed to open project");
    }

    pub fn create_epic(&mut self, title: &str) -> Item {
        self.project
            .build(ItemKind::Epic, title)
            .create()
            .expect("Failed to create epic")
    }

    pub fn create_issue(&mut self, title: &str, epic: &Item) -> Item {
        self.project
            .build(ItemKind::Issue, title)
            .parent(epic.id())
            .create()
            .expect("Failed to create issue")
    }

    pub fn create_task(&mut self, title: &str, issue: &Item, status: Status) -> Item {
        self.project
            .build(ItemKind::Task, title)
            .parent(issue.id())
            .status(status)
            .create()
            .expect("Failed to create task")
    }

    pub fn create_pr(&mut self, title: &str, status: PrStatus) -> Item {
        self.project
            .build(ItemKind::Pr, title)
            .pr_status(status)
            .create()
            .expect("Failed to create PR")
    }

    /// Path of a file in the directory for `kind`.
    pub fn path(&self, kind: ItemKind, name: &str) -> PathBuf {
        self.project.store().dir(kind).join(name)
    }

    /// Write a raw item file, bypassing the store.
    pub fn write_raw(&self, kind: ItemKind, name: &str, content: &str) -> PathBuf {
        let path = self.path(kind, name);
        fs::write(&path, content).expect("Failed to write raw file");
        path
    }

    pub fn read(&self, kind: ItemKind, id: &str) -> Item {
        self.project.store().load(kind, id).expect("Failed to load item")
    }

    /// Raw contents of every item file of one kind, for before/after checks.
    pub fn snapshot_files(&self, kind: ItemKind) -> Vec<(PathBuf, String)> {
        self.project
            .store()
            .list_files(kind)
            .expect("Failed to list files")
            .into_iter()
            .map(|p| {
                let content = fs::read_to_string(&p).expect("Failed to read file");
                (p, content)
            })
            .collect()
    }

    pub fn rebuild_graph(&mut self) {
        self.project.graph_mut().rebuild_cache().expect("Failed to rebuild graph");
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
