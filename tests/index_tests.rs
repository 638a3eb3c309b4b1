//! Integration tests for the derived index.
//!
//! Tests rebuilds, persistence, staleness detection and single-item updates.

mod common;

use common::TestEnv;
use std::fs;
use std::time::{Duration, SystemTime};
use workplan::index::{IndexChange, LoadSource, StaleReason};
use workplan::{ItemKind, Patch, PrStatus, State, Status};

fn write_issues(env: &TestEnv, count: usize) {
    for n in 1..=count {
        env.write_raw(
            ItemKind::Issue,
            &format!("ISS-{:04}-issue.md", n),
            &format!("---\nid: ISS-{:04}\ntitle: Issue {}\nstatus: active\n---\n", n, n),
        );
    }
}

// =============================================================================
// Rebuild Tests
// =============================================================================

#[test]
fn test_rebuild_empty_project() {
    let mut env = TestEnv::new();
    let report = env.project.index_mut().rebuild_index().unwrap();

    assert_eq!(report.indexed, 0);
    assert!(report.skipped.is_empty());
    assert_eq!(env.project.index().snapshot().stats.total(), 0);
}

#[test]
fn test_rebuild_single_file() {
    let mut env = TestEnv::new();
    write_issues(&env, 1);

    env.project.index_mut().rebuild_index().unwrap();
    let stats = env.project.index().snapshot().stats;
    assert_eq!(stats.total_issues, 1);
    assert_eq!(stats.total_epics, 0);
    assert_eq!(env.project.index().get_item("ISS-0001").unwrap().state, State::Active);
}

#[test]
fn test_rebuild_many_files_with_one_malformed() {
    let mut env = TestEnv::new();
    write_issues(&env, 120);
    env.write_raw(ItemKind::Issue, "ISS-0999-broken.md", "---\nid: ISS-0999\ntitle: [unclosed\n");

    let report = env.project.index_mut().rebuild_index().unwrap();

    assert_eq!(report.indexed, 120);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("ISS-0999-broken.md"));
    assert_eq!(env.project.index().snapshot().stats.total_issues, 120);
    assert_eq!(env.project.index().get_items_by_type(ItemKind::Issue).len(), 120);
    assert!(env.project.index().get_item("ISS-0999").is_none());
}

#[test]
fn test_rebuild_reports_progress() {
    let mut env = TestEnv::new();
    write_issues(&env, 5);

    let mut seen = Vec::new();
    env.project
        .index_mut()
        .rebuild_index_with_progress(|p| seen.push((p.scanned, p.total)))
        .unwrap();

    assert_eq!(seen.len(), 5);
    assert_eq!(seen.last(), Some(&(5, 5)));
}

#[test]
fn test_duplicate_id_is_skipped() {
    let mut env = TestEnv::new();
    env.write_raw(ItemKind::Epic, "EP-0001-a.md", "---\nid: EP-0001\ntitle: First\n---\n");
    env.write_raw(ItemKind::Epic, "EP-0001-b.md", "---\nid: EP-0001\ntitle: Second\n---\n");

    let report = env.project.index_mut().rebuild_index().unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(env.project.index().get_item("EP-0001").unwrap().title, "First");
}

// =============================================================================
// Persistence and Staleness Tests
// =============================================================================

#[test]
fn test_fresh_snapshot_is_reused() {
    let mut env = TestEnv::new();
    write_issues(&env, 3);
    env.project.index_mut().rebuild_index().unwrap();

    assert_eq!(env.project.index_mut().load_index().unwrap(), LoadSource::Persisted);
    assert_eq!(env.project.index().snapshot().stats.total_issues, 3);
}

#[test]
fn test_malformed_file_does_not_force_rebuild_loop() {
    let mut env = TestEnv::new();
    write_issues(&env, 2);
    env.write_raw(ItemKind::Issue, "ISS-0003-broken.md", "not frontmatter");
    env.project.index_mut().rebuild_index().unwrap();

    assert_eq!(env.project.index_mut().load_index().unwrap(), LoadSource::Persisted);
}

#[test]
fn test_new_file_makes_index_stale() {
    let mut env = TestEnv::new();
    write_issues(&env, 2);
    env.project.index_mut().rebuild_index().unwrap();

    env.write_raw(ItemKind::Task, "TSK-0001-new.md", "---\nid: TSK-0001\ntitle: New\nissue_id: ISS-0001\n---\n");

    let source = env.project.index_mut().load_index().unwrap();
    assert!(matches!(
        source,
        LoadSource::Rebuilt(StaleReason::CountMismatch {
            kind: ItemKind::Task,
            indexed: 0,
            on_disk: 1
        })
    ));
    assert_eq!(env.project.index().snapshot().stats.total_tasks, 1);
}

#[test]
fn test_modified_file_makes_index_stale() {
    let mut env = TestEnv::new();
    write_issues(&env, 2);
    env.project.index_mut().rebuild_index().unwrap();

    let path = env.write_raw(
        ItemKind::Issue,
        "ISS-0002-issue.md",
        "---\nid: ISS-0002\ntitle: Renamed\nstatus: completed\n---\n",
    );
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(3600))
        .unwrap();

    let source = env.project.index_mut().load_index().unwrap();
    assert!(matches!(source, LoadSource::Rebuilt(StaleReason::Modified(_))));
    let summary = env.project.index().get_item("ISS-0002").unwrap();
    assert_eq!(summary.title, "Renamed");
    assert_eq!(summary.state, State::Done);
    assert!(!env.project.index().get_index_stats().unwrap().healthy);
}

#[test]
fn test_missing_snapshot_triggers_rebuild() {
    let mut env = TestEnv::new();
    write_issues(&env, 1);
    fs::remove_file(&env.project.store().paths().index_file).unwrap();

    assert_eq!(
        env.project.index_mut().load_index().unwrap(),
        LoadSource::Rebuilt(StaleReason::Missing)
    );
    assert!(env.project.store().paths().index_file.exists());
}

#[test]
fn test_unreadable_snapshot_triggers_rebuild() {
    let mut env = TestEnv::new();
    write_issues(&env, 1);
    fs::write(&env.project.store().paths().index_file, "{ not json").unwrap();

    let source = env.project.index_mut().load_index().unwrap();
    assert!(matches!(source, LoadSource::Rebuilt(StaleReason::Unreadable(_))));
    assert_eq!(env.project.index().snapshot().stats.total_issues, 1);
}

#[test]
fn test_persist_failure_keeps_in_memory_index() {
    let mut env = TestEnv::new();
    write_issues(&env, 2);
    let index_file = env.project.store().paths().index_file.clone();
    fs::remove_file(&index_file).unwrap();
    fs::create_dir_all(index_file.join("blocker")).unwrap();

    let report = env.project.index_mut().rebuild_index().unwrap();
    assert!(report.persist_error.is_some());
    assert_eq!(env.project.index().snapshot().stats.total_issues, 2);
}

#[test]
fn test_snapshot_json_layout() {
    let mut env = TestEnv::new();
    write_issues(&env, 1);
    env.project.index_mut().rebuild_index().unwrap();

    let raw = fs::read_to_string(&env.project.store().paths().index_file).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(json["items"]["ISS-0001"].is_object());
    assert_eq!(json["stats"]["totalIssues"], 1);
    assert!(json["builtAt"].is_string());
    assert_eq!(json["fileCounts"]["issue"], 1);
}

// =============================================================================
// Single-Item Update Tests
// =============================================================================

#[test]
fn test_created_item_is_indexed_without_rebuild() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");

    let summary = env.project.index().get_item(epic.id()).unwrap();
    assert_eq!(summary.title, "Launch");
    assert_eq!(env.project.index().snapshot().stats.total_epics, 1);

    env.reopen();
    assert_eq!(env.project.index_mut().load_index().unwrap(), LoadSource::Persisted);
    assert!(env.project.index().get_item(epic.id()).is_some());
}

#[test]
fn test_update_item_patches_entry() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");
    let built_before = env.project.index().snapshot().built_at;

    env.project
        .update_item(ItemKind::Epic, epic.id(), &Patch::new().set("title", "Relaunch").unwrap())
        .unwrap();

    assert_eq!(env.project.index().get_item(epic.id()).unwrap().title, "Relaunch");
    assert!(env.project.index().snapshot().built_at >= built_before);
    assert_eq!(env.project.index().snapshot().stats.total_epics, 1);
}

#[test]
fn test_update_item_reports_changes() {
    let mut env = TestEnv::new();
    env.write_raw(ItemKind::Pr, "PR-0001-x.md", "---\nid: PR-0001\ntitle: X\nstatus: open\n---\n");

    let update = env.project.index_mut().update_item(ItemKind::Pr, "PR-0001").unwrap();
    assert_eq!(update.change, IndexChange::Inserted);
    assert_eq!(env.project.index().snapshot().stats.total_prs, 1);

    let update = env.project.index_mut().update_item(ItemKind::Pr, "PR-0001").unwrap();
    assert_eq!(update.change, IndexChange::Updated);

    fs::remove_file(env.path(ItemKind::Pr, "PR-0001-x.md")).unwrap();
    let update = env.project.index_mut().update_item(ItemKind::Pr, "PR-0001").unwrap();
    assert_eq!(update.change, IndexChange::Removed);
    assert_eq!(env.project.index().snapshot().stats.total_prs, 0);

    let update = env.project.index_mut().update_item(ItemKind::Pr, "PR-0001").unwrap();
    assert_eq!(update.change, IndexChange::Absent);
}

#[test]
fn test_update_item_leaves_snapshot_stale_when_others_changed() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");
    let other = env.write_raw(ItemKind::Epic, "EP-0002-other.md", "---\nid: EP-0002\ntitle: Other\n---\n");
    fs::File::options()
        .write(true)
        .open(&other)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(3600))
        .unwrap();

    let update = env.project.index_mut().update_item(ItemKind::Epic, epic.id()).unwrap();
    assert!(!update.fresh);

    assert!(matches!(
        env.project.index_mut().load_index().unwrap(),
        LoadSource::Rebuilt(_)
    ));
    assert!(env.project.index().get_item("EP-0002").is_some());
}

#[test]
fn test_update_item_does_not_hide_external_delete() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");
    let first = env.create_issue("First", &epic);
    let second = env.create_issue("Second", &epic);
    let second_path = env
        .project
        .store()
        .find_path(ItemKind::Issue, second.id())
        .unwrap()
        .unwrap();
    fs::remove_file(second_path).unwrap();

    let update = env.project.index_mut().update_item(ItemKind::Issue, first.id()).unwrap();
    assert!(!update.fresh);

    let source = env.project.index_mut().load_index().unwrap();
    assert!(matches!(
        source,
        LoadSource::Rebuilt(StaleReason::CountMismatch {
            kind: ItemKind::Issue,
            indexed: 2,
            on_disk: 1
        })
    ));
    assert!(env.project.index().get_item(second.id()).is_none());
    assert_eq!(env.project.index().snapshot().stats.total_issues, 1);
}

#[test]
fn test_update_item_does_not_hide_backdated_add() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");
    let first = env.create_issue("First", &epic);
    let added = env.write_raw(
        ItemKind::Issue,
        "ISS-0009-copied.md",
        "---\nid: ISS-0009\ntitle: Copied in\nstatus: active\n---\n",
    );
    fs::File::options()
        .write(true)
        .open(&added)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(3600))
        .unwrap();

    let update = env.project.index_mut().update_item(ItemKind::Issue, first.id()).unwrap();
    assert!(!update.fresh);
    assert_eq!(update.change, IndexChange::Updated);

    let source = env.project.index_mut().load_index().unwrap();
    assert!(matches!(
        source,
        LoadSource::Rebuilt(StaleReason::CountMismatch {
            kind: ItemKind::Issue,
            indexed: 1,
            on_disk: 2
        })
    ));
    assert!(env.project.index().get_item("ISS-0009").is_some());
}

#[test]
fn test_update_item_notices_other_directory_changes() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");
    let task_dir = env.project.store().dir(ItemKind::Task).to_path_buf();
    fs::File::open(&task_dir)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(3600))
        .unwrap();

    let update = env.project.index_mut().update_item(ItemKind::Epic, epic.id()).unwrap();
    assert!(!update.fresh);
    assert!(matches!(
        env.project.index_mut().load_index().unwrap(),
        LoadSource::Rebuilt(StaleReason::Modified(_))
    ));
}

#[test]
fn test_delete_removes_entry() {
    let mut env = TestEnv::new();
    let pr = env.create_pr("Add login", PrStatus::Open);
    env.project.delete_item(ItemKind::Pr, pr.id()).unwrap();

    assert!(env.project.index().get_item(pr.id()).is_none());
    assert_eq!(env.project.index().snapshot().stats.total_prs, 0);
}

// =============================================================================
// Query Tests
// =============================================================================

#[test]
fn test_overview_counts_and_completion() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");
    let issue = env.create_issue("Login", &epic);
    env.create_task("Form", &issue, Status::Done);
    env.create_task("Validation", &issue, Status::InProgress);

    let overview = env.project.index().get_project_overview();
    assert_eq!(overview.total_items, 4);
    assert_eq!(overview.stats.total_tasks, 2);
    assert_eq!(overview.completed_items, 1);
    assert_eq!(overview.completion_rate, 25.0);
    assert_eq!(overview.by_state.get(&State::Planning), Some(&2));
    assert_eq!(overview.by_state.get(&State::Active), Some(&1));
    assert_eq!(overview.by_state.get(&State::Done), Some(&1));
}

#[test]
fn test_items_by_status() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");
    let issue = env.create_issue("Login", &epic);
    env.create_task("Form", &issue, Status::InProgress);
    env.create_pr("Add login", PrStatus::Open);

    let index = env.project.index();
    assert_eq!(index.get_items_by_status("in-progress").len(), 1);
    assert_eq!(index.get_items_by_status("active").len(), 2);
    assert_eq!(index.get_items_by_status("planning").len(), 2);
}

#[test]
fn test_index_stats_health() {
    let mut env = TestEnv::new();
    env.create_epic("Launch");

    let health = env.project.index().get_index_stats().unwrap();
    assert!(health.healthy);
    assert_eq!(health.item_count, 1);
    assert!(health.snapshot_bytes > 0);
    assert!(health.stale_reason.is_none());
}
