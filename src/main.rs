//! Workplan CLI - file-backed epics, issues, tasks and PRs.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use workplan::graph::{IssueBranch, ParentRef};
use workplan::index::ItemSummary;
use workplan::reconcile::{ActionOutcome, SyncChange, SyncVerdict};
use workplan::state::{allowed_transitions, validate_transition};
use workplan::{Item, Project, State, SyncOptions};

mod cli;

use cli::{Cli, Command, DepsCommand, IndexCommand, ShowTarget, StateCommand};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("workplan")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("workplan.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn get_project_dir(cli: &Cli) -> PathBuf {
    if let Some(dir) = &cli.dir {
        return dir.clone();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    Project::find_root(&cwd).unwrap_or(cwd)
}

fn actor(explicit: Option<String>) -> String {
    explicit
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "workplan".to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

fn format_state(state: State) -> ColoredString {
    match state {
        State::Planning | State::ReadyForEngineering => state.as_str().white(),
        State::Active => state.as_str().yellow(),
        State::ReadyForQa | State::ReadyForDeployment => state.as_str().cyan(),
        State::Completed | State::Done => state.as_str().green(),
        State::Archived | State::WontDo => state.as_str().dimmed(),
    }
}

fn print_summary(summary: &ItemSummary) {
    println!(
        "{} {} {} {}",
        format_state(summary.state),
        summary.id.cyan(),
        summary.title,
        summary
            .parent_id
            .as_ref()
            .map(|p| format!("({})", p).dimmed().to_string())
            .unwrap_or_default()
    );
}

fn print_item_line(indent: &str, item: &Item) {
    println!("{}{} {} [{}]", indent, item.id().cyan(), item.header.title, item.status_label());
}

fn print_parent(label: &str, parent: &ParentRef) {
    match parent {
        ParentRef::Resolved { item } => println!("{}: {} {}", label.bold(), item.id().cyan(), item.header.title),
        ParentRef::Placeholder { placeholder } => {
            println!("{}: {} {}", label.bold(), placeholder.id.cyan(), "(missing)".red())
        }
        ParentRef::None => {}
    }
}

fn print_branch(branch: &IssueBranch) {
    print_item_line("  ", &branch.issue);
    for task in &branch.tasks {
        print_item_line("    ", task);
    }
    for pr in &branch.prs {
        print_item_line("    ", pr);
    }
}

fn run(cli: Cli) -> Result<()> {
    let project_dir = get_project_dir(&cli);
    let json = cli.json;

    match cli.command {
        Command::Init => {
            Project::init(&project_dir).context("Failed to initialize workplan project")?;
            println!("{} Initialized workplan project in {}", "✓".green(), project_dir.display());
        }

        Command::Index { command } => {
            let mut project = Project::open(&project_dir).context("Failed to open project")?;
            match command {
                IndexCommand::Rebuild => {
                    let report = project.index_mut().rebuild_index().context("Failed to rebuild index")?;
                    println!(
                        "{} Indexed {} item(s) in {:?}",
                        "✓".green(),
                        report.indexed,
                        report.duration
                    );
                    for skipped in &report.skipped {
                        println!("  {} {}: {}", "⚠".yellow(), skipped.path.display(), skipped.message);
                    }
                    if let Some(e) = &report.persist_error {
                        println!("  {} Index not saved: {}", "✗".red(), e);
                    }
                }
                IndexCommand::Stats => {
                    let health = project.index().get_index_stats()?;
                    if json {
                        return print_json(&health);
                    }
                    let flag = if health.healthy { "healthy".green() } else { "stale".red() };
                    println!("{}: {}", "Index".bold(), health.index_file.display());
                    println!("{}: {}", "Status".bold(), flag);
                    println!("{}: {}", "Items".bold(), health.item_count);
                    println!("{}: {} bytes", "Size".bold(), health.snapshot_bytes);
                    println!("{}: {}", "Built".bold(), health.built_at);
                    if let Some(reason) = &health.stale_reason {
                        println!("{}: {}", "Reason".bold(), reason);
                    }
                }
                IndexCommand::Overview => {
                    let overview = project.index().get_project_overview();
                    if json {
                        return print_json(&overview);
                    }
                    println!(
                        "{} epics, {} issues, {} tasks, {} PRs",
                        overview.stats.total_epics,
                        overview.stats.total_issues,
                        overview.stats.total_tasks,
                        overview.stats.total_prs
                    );
                    for (state, count) in &overview.by_state {
                        println!("  {} {}", format_state(*state), count);
                    }
                    println!(
                        "{} {}/{} complete ({:.1}%)",
                        "→".blue(),
                        overview.completed_items,
                        overview.total_items,
                        overview.completion_rate
                    );
                }
            }
        }

        Command::List { kind, status } => {
            let project = Project::open(&project_dir).context("Failed to open project")?;
            let index = project.index();
            let mut items: Vec<&ItemSummary> = match &status {
                Some(status) => index.get_items_by_status(status),
                None => index.all_items().collect(),
            };
            if let Some(kind) = kind {
                items.retain(|s| s.kind == kind);
            }

            if json {
                return print_json(&items);
            }
            if items.is_empty() {
                println!("{}", "No items found".dimmed());
            } else {
                for summary in items {
                    print_summary(summary);
                }
            }
        }

        Command::Show { target } => {
            let project = Project::open(&project_dir).context("Failed to open project")?;
            let graph = project.graph();
            match target {
                ShowTarget::Epic { id } => {
                    let hierarchy = graph.get_epic_hierarchy(&id)?;
                    if json {
                        return print_json(&hierarchy);
                    }
                    print_item_line("", &hierarchy.epic);
                    for branch in &hierarchy.issues {
                        print_branch(branch);
                    }
                    for pr in &hierarchy.prs {
                        print_item_line("  ", pr);
                    }
                }
                ShowTarget::Issue { id } => {
                    let hierarchy = graph.get_issue_hierarchy(&id)?;
                    if json {
                        return print_json(&hierarchy);
                    }
                    print_item_line("", &hierarchy.issue);
                    print_parent("Epic", &hierarchy.epic);
                    for task in &hierarchy.tasks {
                        print_item_line("  ", task);
                    }
                    for pr in &hierarchy.prs {
                        print_item_line("  ", pr);
                    }
                }
                ShowTarget::Pr { id } => {
                    let hierarchy = graph.get_pr_hierarchy(&id)?;
                    if json {
                        return print_json(&hierarchy);
                    }
                    print_item_line("", &hierarchy.pr);
                    print_parent("Issue", &hierarchy.issue);
                    print_parent("Epic", &hierarchy.epic);
                    for task in &hierarchy.tasks {
                        print_item_line("  ", task);
                    }
                    if !hierarchy.depends_on.is_empty() {
                        println!("{}: {}", "Depends on".bold(), hierarchy.depends_on.join(", "));
                    }
                    if !hierarchy.dependents.is_empty() {
                        println!("{}: {}", "Required by".bold(), hierarchy.dependents.join(", "));
                    }
                }
            }
        }

        Command::Related { id } => {
            let project = Project::open(&project_dir).context("Failed to open project")?;
            let related = project.graph().get_related_items(&id)?;
            if json {
                return print_json(&related);
            }
            println!("{}: {}", "Siblings".bold(), related.siblings.join(", "));
            println!("{}: {}", "Linked".bold(), related.linked.join(", "));
            println!("{}: {}", "Depends on".bold(), related.dependencies.join(", "));
            println!("{}: {}", "Dependents".bold(), related.dependents.join(", "));
        }

        Command::Deps { command } => {
            let mut project = Project::open(&project_dir).context("Failed to open project")?;
            match command {
                DepsCommand::Add {
                    pr,
                    other,
                    kind,
                    reason,
                } => {
                    let record = project
                        .add_pr_dependency(&pr, &other, kind, reason.as_deref(), &actor(None))
                        .context("Failed to add dependency")?;
                    println!(
                        "{} {} {} {}",
                        "✓".green(),
                        record.pr_id.cyan(),
                        record.kind,
                        record.dependent_pr_id.cyan()
                    );
                }
                DepsCommand::Resolve { pr, other } => {
                    let n = project.resolve_pr_dependency(&pr, &other, &actor(None))?;
                    println!("{} Resolved {} dependency record(s)", "✓".green(), n);
                }
                DepsCommand::Remove { pr, other } => {
                    let n = project.remove_pr_dependency(&pr, &other)?;
                    println!("{} Removed {} dependency record(s)", "✓".green(), n);
                }
                DepsCommand::Check => {
                    let cycles = project.graph().detect_cycles();
                    if json {
                        return print_json(&cycles);
                    }
                    if cycles.is_empty() {
                        println!("{} No dependency cycles", "✓".green());
                    } else {
                        for cycle in cycles {
                            println!("{} {}", "⊘".red(), cycle.join(" -> "));
                        }
                    }
                }
                DepsCommand::MergeCheck { pr } => {
                    let check = project.check_mergeability(&pr)?;
                    if json {
                        return print_json(&check);
                    }
                    if check.can_merge {
                        println!("{} {} can merge", "✓".green(), check.pr_id.cyan());
                    } else {
                        println!("{} {} is blocked:", "⊘".red(), check.pr_id.cyan());
                    }
                    for reason in &check.blocking_reasons {
                        println!("  {}", reason);
                    }
                }
            }
        }

        Command::State { command } => match command {
            StateCommand::Allowed { state } => {
                let allowed: Vec<&str> = allowed_transitions(state).iter().map(State::as_str).collect();
                if json {
                    return print_json(&allowed);
                }
                println!("{} -> {}", format_state(state), allowed.join(", "));
            }
            StateCommand::Validate { from, to } => {
                let check = validate_transition(from, to);
                if json {
                    return print_json(&check);
                }
                match &check.error {
                    None => println!("{} {} -> {} is allowed", "✓".green(), from, to),
                    Some(e) => println!("{} {}", "✗".red(), e),
                }
            }
            StateCommand::Transition {
                kind,
                id,
                to,
                reason,
                actor: who,
            } => {
                let mut project = Project::open(&project_dir).context("Failed to open project")?;
                let item = project
                    .transition(kind, &id, to, &actor(who), reason.as_deref())
                    .context("Failed to transition item")?;
                println!("{} {} is now {}", "✓".green(), item.id().cyan(), format_state(to));
            }
        },

        Command::Migrate { dry_run, actor: who } => {
            let mut project = Project::open(&project_dir).context("Failed to open project")?;
            let report = project.migrate_all(&actor(who), dry_run)?;
            if json {
                return print_json(&report);
            }
            let verb = if dry_run { "Would migrate" } else { "Migrated" };
            println!(
                "{} {} {} of {} item(s), {} skipped, {} failed",
                "✓".green(),
                verb,
                report.migrated,
                report.total,
                report.skipped,
                report.failed
            );
            for entry in report.log.iter().filter(|e| !e.success) {
                println!(
                    "  {} {}: {}",
                    "✗".red(),
                    entry.item_id,
                    entry.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        Command::Sync {
            pr,
            force,
            dry_run,
            check,
            actor: who,
        } => {
            let mut project = Project::open(&project_dir).context("Failed to open project")?;
            if check {
                let status = project.sync_status(&pr)?;
                if json {
                    return print_json(&status);
                }
                println!(
                    "{} [{}]: {} task(s), {} in sync, {} out of sync, {} conflict(s)",
                    status.pr_id.cyan(),
                    status.pr_status,
                    status.linked_tasks,
                    status.in_sync,
                    status.out_of_sync,
                    status.conflicts
                );
                for mapping in &status.mappings {
                    let verdict = match &mapping.verdict {
                        SyncVerdict::InSync => "in sync".green(),
                        SyncVerdict::Propose { .. } => "out of sync".yellow(),
                        SyncVerdict::Conflict { .. } => "conflict".red(),
                    };
                    println!("  {} [{}] {}", mapping.task_id.cyan(), mapping.task_status, verdict);
                }
                return Ok(());
            }

            let options = SyncOptions {
                force,
                dry_run,
                actor: actor(who),
            };
            let report = project.sync_pr(&pr, &options)?;
            if json {
                return print_json(&report);
            }
            if report.actions.is_empty() {
                println!("{} {} and its tasks are in sync", "✓".green(), report.pr_id.cyan());
            }
            for action in &report.actions {
                let change = match &action.change {
                    SyncChange::Task { from, to, .. } => format!("{} {} -> {}", action.task_id, from, to),
                    SyncChange::Pr { from, to, .. } => format!("{} {} -> {}", action.pr_id, from, to),
                };
                let outcome = match &action.outcome {
                    ActionOutcome::Applied => "applied".green(),
                    ActionOutcome::WouldApply => "would apply".yellow(),
                    ActionOutcome::Blocked(why) => format!("blocked: {}", why).red(),
                    ActionOutcome::Skipped(why) => format!("skipped: {}", why).dimmed(),
                };
                let reason = action
                    .reason
                    .as_ref()
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default();
                println!("  {} {}{}", change, outcome, reason.dimmed());
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
