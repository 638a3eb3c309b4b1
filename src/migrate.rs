//! Migration from legacy status fields to the unified state.

use crate::state::legacy_state;
use crate::types::{Item, ItemKind, State, StateMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOperation {
    AddStateFields,
    RemoveStateFields,
}

/// One line of a migration log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationLogEntry {
    pub item_id: String,
    pub item_type: ItemKind,
    pub operation: MigrationOperation,
    pub old_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<State>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOutcome {
    pub item: Item,
    pub migrated: bool,
    /// Present only when the item was migrated.
    pub entry: Option<MigrationLogEntry>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub total: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub log: Vec<MigrationLogEntry>,
    #[serde(skip)]
    pub items: Vec<Item>,
}

/// Undo step derived from a migration log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackOp {
    pub item_id: String,
    pub item_type: ItemKind,
    pub operation: MigrationOperation,
    pub restore_status: String,
}

pub fn needs_migration(item: &Item) -> bool {
    item.header.state.is_none()
}

/// Stamp the unified state implied by the legacy status.
pub fn migrate_item(item: &Item, actor: &str) -> MigrationOutcome {
    if !needs_migration(item) {
        return MigrationOutcome {
            item: item.clone(),
            migrated: false,
            entry: None,
        };
    }

    let now = Utc::now();
    let state = legacy_state(item);
    let mut migrated = item.clone();
    migrated.header.state = Some(state);
    migrated.header.state_metadata = Some(StateMetadata {
        transitioned_at: now,
        transitioned_by: actor.to_string(),
        previous_state: None,
        automation_eligible: false,
        automation_source: Some("migration".to_string()),
        transition_reason: Some(format!("Migrated from legacy status '{}'", item.status_label())),
        reviewer: None,
    });

    MigrationOutcome {
        item: migrated,
        migrated: true,
        entry: Some(MigrationLogEntry {
            item_id: item.id().to_string(),
            item_type: item.kind(),
            operation: MigrationOperation::AddStateFields,
            old_status: item.status_label().to_string(),
            new_state: Some(state),
            timestamp: now,
            success: true,
            error: None,
        }),
    }
}

/// Migrate many items. Invalid items are logged as failures and left as is.
pub fn migrate_items(items: &[Item], actor: &str) -> MigrationReport {
    let mut report = MigrationReport {
        total: items.len(),
        ..Default::default()
    };

    for item in items {
        if let Err(e) = item.validate() {
            report.failed += 1;
            report.log.push(MigrationLogEntry {
                item_id: item.id().to_string(),
                item_type: item.kind(),
                operation: MigrationOperation::AddStateFields,
                old_status: item.status_label().to_string(),
                new_state: None,
                timestamp: Utc::now(),
                success: false,
                error: Some(e.to_string()),
            });
            report.items.push(item.clone());
            continue;
        }

        let outcome = migrate_item(item, actor);
        if outcome.migrated {
            report.migrated += 1;
        } else {
            report.skipped += 1;
        }
        report.log.extend(outcome.entry);
        report.items.push(outcome.item);
    }

    log::info!(
        "Migration: {} total, {} migrated, {} skipped, {} failed",
        report.total,
        report.migrated,
        report.skipped,
        report.failed
    );
    report
}

/// One `remove_state_fields` op per successful `add_state_fields` entry.
pub fn rollback_plan(log: &[MigrationLogEntry]) -> Vec<RollbackOp> {
    log.iter()
        .filter(|e| e.success && e.operation == MigrationOperation::AddStateFields)
        .map(|e| RollbackOp {
            item_id: e.item_id.clone(),
            item_type: e.item_type,
            operation: MigrationOperation::RemoveStateFields,
            restore_status: e.old_status.clone(),
        })
        .collect()
}

/// Strip the unified state fields from an item.
pub fn rollback_item(item: &Item) -> Item {
    let mut rolled_back = item.clone();
    rolled_back.header.state = None;
    rolled_back.header.state_metadata = None;
    rolled_back
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EpicDetail, ItemDetail, ItemHeader, Status};
    use std::path::PathBuf;

    fn epic(id: &str, status: Status) -> Item {
        Item {
            header: ItemHeader::new(id, "Epic"),
            detail: ItemDetail::Epic(EpicDetail {
                status,
                ..Default::default()
            }),
            file_path: PathBuf::new(),
            body: String::new(),
        }
    }

    #[test]
    fn test_migrate_maps_legacy_status() {
        let outcome = migrate_item(&epic("EP-0001", Status::Completed), "migrator");
        assert!(outcome.migrated);
        assert_eq!(outcome.item.header.state, Some(State::Done));

        let meta = outcome.item.header.state_metadata.as_ref().unwrap();
        assert_eq!(meta.transitioned_by, "migrator");
        assert_eq!(meta.previous_state, None);

        let entry = outcome.entry.unwrap();
        assert_eq!(entry.old_status, "completed");
        assert_eq!(entry.new_state, Some(State::Done));
        assert!(outcome.item.validate().is_ok());
    }

    #[test]
    fn test_migration_is_idempotent() {
        let first = migrate_item(&epic("EP-0001", Status::Active), "migrator");
        let second = migrate_item(&first.item, "migrator");
        assert!(!second.migrated);
        assert_eq!(second.item, first.item);
        assert!(second.entry.is_none());
    }

    #[test]
    fn test_batch_counts_and_rollback() {
        let mut bad = epic("EP-0003", Status::Planning);
        bad.header.title = String::new();
        let already = migrate_item(&epic("EP-0002", Status::Active), "m").item;
        let items = vec![epic("EP-0001", Status::Planning), already, bad];

        let report = migrate_items(&items, "migrator");
        assert_eq!(report.total, 3);
        assert_eq!(report.migrated, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.log.len(), 2);
        assert!(report.log.iter().any(|e| !e.success && e.error.is_some()));

        let plan = rollback_plan(&report.log);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].item_id, "EP-0001");
        assert_eq!(plan[0].operation, MigrationOperation::RemoveStateFields);
        assert_eq!(plan[0].restore_status, "planning");

        let restored = rollback_item(&report.items[0]);
        assert!(needs_migration(&restored));
    }
}
