//! Workplan: a derived index and relationship engine for Markdown work items.
//!
//! Epics, issues, tasks and pull requests live as one Markdown file each,
//! with YAML frontmatter holding the structured fields. Workplan keeps a
//! rebuildable JSON index over those files, answers hierarchy and dependency
//! questions, drives the unified lifecycle state machine and keeps PRs and
//! the tasks they close in step.
//!
//! # Example
//!
//! ```no_run
//! use workplan::{ItemKind, Project, ProjectBuilderExt, State, Status};
//! use std::path::Path;
//!
//! // Initialize a new project
//! let mut project = Project::init(Path::new(".")).unwrap();
//!
//! // Create items
//! let epic = project.build(ItemKind::Epic, "Launch").create().unwrap();
//! let issue = project.build(ItemKind::Issue, "Login").parent(epic.id()).create().unwrap();
//! let task = project
//!     .build(ItemKind::Task, "Login form")
//!     .parent(issue.id())
//!     .status(Status::Todo)
//!     .create()
//!     .unwrap();
//!
//! // Walk the hierarchy
//! let hierarchy = project.graph().get_epic_hierarchy(epic.id()).unwrap();
//! assert_eq!(hierarchy.issues[0].tasks.len(), 1);
//!
//! // Move the task through its lifecycle
//! project
//!     .transition(ItemKind::Task, task.id(), State::Active, "sam", Some("started"))
//!     .unwrap();
//! ```

mod frontmatter;
mod id;

pub mod builder;
pub mod config;
pub mod deps;
pub mod error;
pub mod graph;
pub mod index;
pub mod migrate;
pub mod project;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod types;

// Re-export public API
pub use builder::{ItemBuilder, ProjectBuilderExt};
pub use config::{ProjectConfig, ProjectPaths};
pub use deps::{DependencyGraph, DependencyRecord, DependencyType};
pub use error::{Error, ValidationError};
pub use graph::RelationshipGraph;
pub use index::IndexEngine;
pub use project::Project;
pub use reconcile::{SyncDirection, SyncOptions};
pub use store::{ItemStore, Patch};
pub use types::{Item, ItemDetail, ItemHeader, ItemKind, PrStatus, Priority, State, Status};
