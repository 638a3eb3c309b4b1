//! CLI argument parsing for workplan.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use workplan::deps::DependencyType;
use workplan::{ItemKind, State};

#[derive(Parser)]
#[command(
    name = "wp",
    about = "Track epics, issues, tasks and PRs as Markdown files",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/workplan/logs/workplan.log"
)]
pub struct Cli {
    /// Project root (default: nearest parent with .workplan/config.yaml, else current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a workplan project in the target directory
    Init,

    /// Manage the derived index
    Index {
        #[command(subcommand)]
        command: IndexCommand,
    },

    /// List indexed items
    List {
        /// Filter by kind (epic, issue, task, pr)
        #[arg(short, long)]
        kind: Option<ItemKind>,

        /// Filter by legacy status or unified state
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show an item with its hierarchy
    Show {
        #[command(subcommand)]
        target: ShowTarget,
    },

    /// Show siblings, dependencies and dependents of an item
    Related {
        /// Item ID
        id: String,
    },

    /// Manage PR dependencies
    Deps {
        #[command(subcommand)]
        command: DepsCommand,
    },

    /// Inspect and apply unified state transitions
    State {
        #[command(subcommand)]
        command: StateCommand,
    },

    /// Add unified state fields to items that only carry a legacy status
    Migrate {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Recorded as the transitioning actor
        #[arg(long)]
        actor: Option<String>,
    },

    /// Reconcile a PR with the tasks it closes
    Sync {
        /// PR ID
        pr: String,

        /// Resolve conflicts in favor of the PR
        #[arg(short, long)]
        force: bool,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Only report whether the PR and its tasks agree
        #[arg(long, conflicts_with_all = ["force", "dry_run"])]
        check: bool,

        /// Recorded as the transitioning actor
        #[arg(long)]
        actor: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum IndexCommand {
    /// Rebuild the index from the item files
    Rebuild,

    /// Show index health
    Stats,

    /// Show counts per kind and state
    Overview,
}

#[derive(Subcommand)]
pub enum ShowTarget {
    /// An epic with its issues, tasks and PRs
    Epic { id: String },

    /// An issue with its epic, tasks and PRs
    Issue { id: String },

    /// A PR with its parents, tasks and dependencies
    Pr { id: String },
}

#[derive(Subcommand)]
pub enum DepsCommand {
    /// Record a dependency between two PRs
    Add {
        /// PR ID
        pr: String,

        /// The other PR
        other: String,

        /// blocks, depends_on, required_by or blocked_by
        #[arg(short = 't', long = "type", default_value = "depends_on")]
        kind: DependencyType,

        /// Why the dependency exists
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Mark the dependencies between two PRs as resolved
    Resolve { pr: String, other: String },

    /// Delete the dependencies between two PRs
    Remove { pr: String, other: String },

    /// Report dependency cycles
    Check,

    /// Check whether a PR is free to merge
    MergeCheck {
        /// PR ID
        pr: String,
    },
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List states reachable in one step
    Allowed { state: State },

    /// Check a single transition
    Validate { from: State, to: State },

    /// Move an item to a new state
    Transition {
        /// Item kind (epic, issue, task, pr)
        kind: ItemKind,

        /// Item ID
        id: String,

        /// Target state
        to: State,

        /// Why the item is moving
        #[arg(short, long)]
        reason: Option<String>,

        /// Recorded as the transitioning actor
        #[arg(long)]
        actor: Option<String>,
    },
}
