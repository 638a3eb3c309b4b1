//! Integration tests for error handling.
//!
//! Tests that structured errors come back for invalid operations and that
//! rejected writes leave the tree untouched.

mod common;

use common::TestEnv;
use std::fs;
use tempfile::TempDir;
use workplan::{Error, ItemKind, Patch, Project, ProjectBuilderExt, State, Status, ValidationError};

fn workplan_error(err: &eyre::Report) -> &Error {
    err.downcast_ref::<Error>().expect("expected a workplan error")
}

// =============================================================================
// Item Not Found Tests
// =============================================================================

#[test]
fn test_update_nonexistent_item_fails() {
    let mut env = TestEnv::new();

    let err = env
        .project
        .update_item(ItemKind::Epic, "EP-0404", &Patch::new().set("title", "x").unwrap())
        .unwrap_err();
    assert_eq!(
        workplan_error(&err),
        &Error::NotFound {
            kind: Some(ItemKind::Epic),
            id: "EP-0404".to_string()
        }
    );
}

#[test]
fn test_delete_nonexistent_item_fails() {
    let mut env = TestEnv::new();

    let err = env.project.delete_item(ItemKind::Task, "TSK-0404").unwrap_err();
    assert!(matches!(workplan_error(&err), Error::NotFound { .. }));
}

#[test]
fn test_transition_nonexistent_item_fails() {
    let mut env = TestEnv::new();

    let err = env
        .project
        .transition(ItemKind::Issue, "ISS-0404", State::Active, "sam", None)
        .unwrap_err();
    assert!(matches!(workplan_error(&err), Error::NotFound { .. }));
}

#[test]
fn test_lookup_by_wrong_kind_fails() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");

    assert!(env.project.store().load(ItemKind::Issue, epic.id()).is_err());
}

// =============================================================================
// Creation Errors
// =============================================================================

#[test]
fn test_create_with_missing_parent_fails() {
    let mut env = TestEnv::new();

    let err = env
        .project
        .build(ItemKind::Task, "Orphan")
        .parent("ISS-0009")
        .create()
        .unwrap_err();
    match workplan_error(&err) {
        Error::Validation(ValidationError::DanglingReference { field, target_id, .. }) => {
            assert_eq!(*field, "issue_id");
            assert_eq!(target_id, "ISS-0009");
        }
        other => panic!("expected dangling reference, got {:?}", other),
    }
    assert!(env.snapshot_files(ItemKind::Task).is_empty());
}

#[test]
fn test_create_issue_under_task_id_fails() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");
    let issue = env.create_issue("Login", &epic);
    let task = env.create_task("Form", &issue, Status::Todo);

    let err = env
        .project
        .build(ItemKind::Issue, "Misfiled")
        .parent(task.id())
        .create()
        .unwrap_err();
    assert!(matches!(
        workplan_error(&err),
        Error::Validation(ValidationError::DanglingReference { field: "epic_id", .. })
    ));
}

#[test]
fn test_create_duplicate_id_fails() {
    let mut env = TestEnv::new();
    env.create_epic("Launch");

    let err = env
        .project
        .build(ItemKind::Epic, "Again")
        .id("EP-0001")
        .create()
        .unwrap_err();
    assert_eq!(
        workplan_error(&err),
        &Error::Validation(ValidationError::DuplicateId("EP-0001".to_string()))
    );
    assert_eq!(env.snapshot_files(ItemKind::Epic).len(), 1);
}

#[test]
fn test_create_empty_title_fails() {
    let mut env = TestEnv::new();

    let err = env.project.build(ItemKind::Epic, "   ").create().unwrap_err();
    assert_eq!(workplan_error(&err), &Error::Validation(ValidationError::EmptyTitle));
    assert!(env.snapshot_files(ItemKind::Epic).is_empty());
}

#[test]
fn test_create_malformed_id_fails() {
    let mut env = TestEnv::new();

    let err = env
        .project
        .build(ItemKind::Epic, "Launch")
        .id("not an id")
        .create()
        .unwrap_err();
    assert!(matches!(
        workplan_error(&err),
        Error::Validation(ValidationError::InvalidId(_))
    ));
}

// =============================================================================
// Update and Transition Errors
// =============================================================================

#[test]
fn test_invalid_patch_leaves_file_unchanged() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");
    let before = env.snapshot_files(ItemKind::Epic);

    let err = env
        .project
        .update_item(ItemKind::Epic, epic.id(), &Patch::new().set("state", "active").unwrap())
        .unwrap_err();
    assert_eq!(
        workplan_error(&err),
        &Error::Validation(ValidationError::StateMetadataMismatch(epic.id().to_string()))
    );
    assert_eq!(env.snapshot_files(ItemKind::Epic), before);
}

#[test]
fn test_invalid_transition_leaves_file_unchanged() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");
    let issue = env.create_issue("Login", &epic);
    let task = env.create_task("Form", &issue, Status::Todo);
    let before = env.snapshot_files(ItemKind::Task);

    let err = env
        .project
        .transition(ItemKind::Task, task.id(), State::Completed, "sam", None)
        .unwrap_err();
    match workplan_error(&err) {
        Error::Validation(ValidationError::InvalidTransition { from, to, allowed }) => {
            assert_eq!(*from, State::Planning);
            assert_eq!(*to, State::Completed);
            assert!(allowed.contains(&State::Active));
        }
        other => panic!("expected invalid transition, got {:?}", other),
    }
    assert_eq!(env.snapshot_files(ItemKind::Task), before);
}

#[test]
fn test_transition_chain_records_metadata() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Launch");

    env.project
        .transition(ItemKind::Epic, epic.id(), State::Active, "sam", Some("kickoff"))
        .unwrap();
    let done = env
        .project
        .transition(ItemKind::Epic, epic.id(), State::Completed, "kim", None)
        .unwrap();

    assert_eq!(done.header.state, Some(State::Completed));
    let meta = done.header.state_metadata.unwrap();
    assert_eq!(meta.previous_state, Some(State::Active));
    assert_eq!(meta.transitioned_by, "kim");
    assert_eq!(done.header.revision, 2);
    assert_eq!(env.project.index().get_item(epic.id()).unwrap().state, State::Completed);
}

// =============================================================================
// Parse Errors
// =============================================================================

#[test]
fn test_malformed_file_is_parse_error() {
    let env = TestEnv::new();
    env.write_raw(ItemKind::Issue, "ISS-0001-bad.md", "---\nid: ISS-0001\ntitle: [oops\n---\n");

    let err = env.project.store().load(ItemKind::Issue, "ISS-0001").unwrap_err();
    match workplan_error(&err) {
        Error::Parse { path, .. } => assert!(path.ends_with("ISS-0001-bad.md")),
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn test_task_without_issue_is_parse_error() {
    let env = TestEnv::new();
    env.write_raw(ItemKind::Task, "TSK-0001-x.md", "---\nid: TSK-0001\ntitle: X\n---\n");

    let err = env.project.store().load(ItemKind::Task, "TSK-0001").unwrap_err();
    assert!(matches!(workplan_error(&err), Error::Parse { .. }));
}

#[test]
fn test_unknown_status_is_parse_error() {
    let env = TestEnv::new();
    env.write_raw(ItemKind::Epic, "EP-0001-x.md", "---\nid: EP-0001\ntitle: X\nstatus: someday\n---\n");

    assert!(env.project.store().load(ItemKind::Epic, "EP-0001").is_err());
}

// =============================================================================
// Project Errors
// =============================================================================

#[test]
fn test_find_root_walks_up() {
    let temp_dir = TempDir::new().unwrap();
    let nested = temp_dir.path().join("a").join("b");
    fs::create_dir_all(&nested).unwrap();

    assert_eq!(Project::find_root(&nested), None);

    Project::init(temp_dir.path()).unwrap();
    assert_eq!(Project::find_root(&nested), Some(temp_dir.path().to_path_buf()));
}

#[test]
fn test_init_is_idempotent() {
    let mut env = TestEnv::new();
    env.create_epic("Launch");

    let project = Project::init(env.temp_dir.path()).unwrap();
    assert_eq!(project.graph().get_all_epics().len(), 1);
}

#[test]
fn test_malformed_config_fails_open() {
    let env = TestEnv::new();
    fs::write(env.temp_dir.path().join(".workplan/config.yaml"), "id_width: [not a number\n").unwrap();

    assert!(Project::open(env.temp_dir.path()).is_err());
}

#[test]
fn test_corrupt_dependency_file_fails_open() {
    let env = TestEnv::new();
    fs::write(&env.project.store().paths().dependencies_file, "{ not json").unwrap();

    let err = Project::open(env.temp_dir.path()).err().unwrap();
    assert!(format!("{:#}", err).contains("Failed to load relationships"));
}
