//! PR/task status reconciliation.
//!
//! A PR and each task it closes are compared under a fixed equivalence of
//! PR statuses to task status classes. When they disagree the side touched
//! most recently wins; equal timestamps fall back to the `revision` counter,
//! and only a full tie is a conflict.

use crate::error::{Error, ValidationError};
use crate::graph::RelationshipGraph;
use crate::project::Project;
use crate::state::{state_for_pr_status, transition_state, validate_transition};
use crate::store::Patch;
use crate::types::{Item, ItemDetail, ItemKind, PrStatus, State, Status};
use chrono::{DateTime, Utc};
use eyre::Result;
use serde::Serialize;
use std::cmp::Ordering;

const FORCED_OVERRIDE: &str = "forced override";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    PrToTask,
    TaskToPr,
}

/// Both sides of a pair that cannot be ordered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncConflict {
    pub pr_id: String,
    pub task_id: String,
    pub pr_status: PrStatus,
    pub task_status: Status,
    pub pr_updated: DateTime<Utc>,
    pub task_updated: DateTime<Utc>,
    pub pr_revision: u64,
    pub task_revision: u64,
}

/// A status change to one side of the pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum SyncChange {
    Task {
        from: Status,
        to: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<State>,
    },
    Pr {
        from: PrStatus,
        to: PrStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<State>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub direction: SyncDirection,
    pub change: SyncChange,
    /// Why the change may not be applied, if it may not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SyncVerdict {
    InSync,
    Propose { proposal: Proposal },
    /// `resolution` is the PR-favored change used when forced.
    Conflict { resolution: Proposal },
}

/// Comparison of a PR with one linked task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncMapping {
    pub pr_id: String,
    pub task_id: String,
    pub pr_status: PrStatus,
    pub task_status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_state: Option<State>,
    pub pr_updated: DateTime<Utc>,
    pub task_updated: DateTime<Utc>,
    pub pr_revision: u64,
    pub task_revision: u64,
    pub verdict: SyncVerdict,
}

impl SyncMapping {
    pub fn is_in_sync(&self) -> bool {
        matches!(self.verdict, SyncVerdict::InSync)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.verdict, SyncVerdict::Conflict { .. })
    }

    pub fn direction(&self) -> Option<SyncDirection> {
        match &self.verdict {
            SyncVerdict::Propose { proposal } => Some(proposal.direction),
            _ => None,
        }
    }

    /// The task status a non-conflicting proposal would set.
    pub fn proposed_task_status(&self) -> Option<Status> {
        match &self.verdict {
            SyncVerdict::Propose {
                proposal:
                    Proposal {
                        change: SyncChange::Task { to, .. },
                        ..
                    },
            } => Some(*to),
            _ => None,
        }
    }

    pub fn conflict(&self) -> Option<SyncConflict> {
        if !self.is_conflict() {
            return None;
        }
        Some(SyncConflict {
            pr_id: self.pr_id.clone(),
            task_id: self.task_id.clone(),
            pr_status: self.pr_status,
            task_status: self.task_status,
            pr_updated: self.pr_updated,
            task_updated: self.task_updated,
            pr_revision: self.pr_revision,
            task_revision: self.task_revision,
        })
    }
}

/// Task status class matching a PR status.
pub fn pr_equivalent(status: PrStatus) -> Status {
    match status {
        PrStatus::Draft => Status::Planning,
        PrStatus::Open | PrStatus::Review | PrStatus::Approved => Status::Active,
        PrStatus::Merged => Status::Completed,
        PrStatus::Closed => Status::Archived,
    }
}

/// PR status a task class asks for.
pub fn pr_status_for(class: Status) -> PrStatus {
    match class.normalized() {
        Status::Planning => PrStatus::Draft,
        Status::Completed => PrStatus::Merged,
        Status::Archived => PrStatus::Closed,
        _ => PrStatus::Open,
    }
}

/// Task classes a PR in `status` may move its tasks to.
pub fn allowed_task_moves(status: PrStatus) -> &'static [Status] {
    match status {
        PrStatus::Draft | PrStatus::Open => &[Status::Planning, Status::Active],
        PrStatus::Review => &[Status::Active],
        PrStatus::Approved => &[Status::Active, Status::Completed],
        PrStatus::Merged => &[Status::Completed],
        PrStatus::Closed => &[Status::Archived, Status::Planning],
    }
}

/// PR statuses a task may move a PR in `status` to.
pub fn allowed_pr_moves(status: PrStatus) -> &'static [PrStatus] {
    match status {
        PrStatus::Draft => &[PrStatus::Open, PrStatus::Closed],
        PrStatus::Open => &[PrStatus::Draft, PrStatus::Review, PrStatus::Closed],
        PrStatus::Review => &[PrStatus::Open, PrStatus::Approved, PrStatus::Closed],
        PrStatus::Approved => &[PrStatus::Review, PrStatus::Merged, PrStatus::Closed],
        PrStatus::Merged => &[],
        PrStatus::Closed => &[PrStatus::Open],
    }
}

fn class_of_state(state: State) -> Status {
    match state {
        State::Planning | State::ReadyForEngineering => Status::Planning,
        State::Active | State::ReadyForQa | State::ReadyForDeployment => Status::Active,
        State::Completed | State::Done => Status::Completed,
        State::Archived | State::WontDo => Status::Archived,
    }
}

fn state_candidates(class: Status) -> &'static [State] {
    match class.normalized() {
        Status::Planning => &[State::Planning],
        Status::Completed => &[State::Completed, State::Done],
        Status::Archived => &[State::Archived, State::WontDo],
        _ => &[State::Active],
    }
}

/// The PR's status class, read through its unified state when set.
fn pr_class(pr: &Item, status: PrStatus) -> Status {
    match pr.header.state {
        Some(state) => class_of_state(state),
        None => pr_equivalent(status),
    }
}

/// The task's status class, read through its unified state when set.
fn task_class(task: &Item, status: Status) -> Status {
    match task.header.state {
        Some(state) => class_of_state(state),
        None => status.normalized(),
    }
}

fn task_status(task: &Item) -> Result<Status, ValidationError> {
    match &task.detail {
        ItemDetail::Task(d) => Ok(d.status),
        other => Err(ValidationError::WrongKind {
            id: task.id().to_string(),
            expected: ItemKind::Task,
            actual: other.kind(),
        }),
    }
}

fn pr_status(pr: &Item) -> Result<PrStatus, ValidationError> {
    match &pr.detail {
        ItemDetail::Pr(d) => Ok(d.pr_status),
        other => Err(ValidationError::WrongKind {
            id: pr.id().to_string(),
            expected: ItemKind::Pr,
            actual: other.kind(),
        }),
    }
}

/// Move the task to `class`, provided a PR in `pr_status` may do so.
fn propose_for_task(pr_status: PrStatus, class: Status, task: &Item, current: Status) -> Proposal {
    let to = Status::in_vocabulary_of(class, current);
    let mut blocked = None;
    let mut state = None;

    if !allowed_task_moves(pr_status).contains(&class) {
        blocked = Some(format!("a {} PR cannot move a task to {}", pr_status, class));
    } else if let Some(from) = task.header.state {
        state = state_candidates(class)
            .iter()
            .copied()
            .find(|to| validate_transition(from, *to).valid);
        if state.is_none() {
            blocked = Some(format!("task state {} has no transition to {}", from, class));
        }
    }

    Proposal {
        direction: SyncDirection::PrToTask,
        change: SyncChange::Task { from: current, to, state },
        blocked,
    }
}

fn propose_for_pr(pr: &Item, current: PrStatus, class: Status) -> Proposal {
    let to = pr_status_for(class);
    let mut blocked = None;
    let mut state = None;

    if !allowed_pr_moves(current).contains(&to) {
        blocked = Some(format!("a task cannot move a {} PR to {}", current, to));
    } else if let Some(from) = pr.header.state {
        let target = state_for_pr_status(to);
        let check = validate_transition(from, target);
        if check.valid {
            state = Some(target);
        } else {
            blocked = check.error;
        }
    }

    Proposal {
        direction: SyncDirection::TaskToPr,
        change: SyncChange::Pr { from: current, to, state },
        blocked,
    }
}

/// Compare a PR with one of its tasks.
pub fn compare(pr: &Item, task: &Item) -> Result<SyncMapping, ValidationError> {
    let pr_status = pr_status(pr)?;
    let status = task_status(task)?;
    let class = task_class(task, status);
    let wanted = pr_class(pr, pr_status);

    let verdict = if wanted == class {
        SyncVerdict::InSync
    } else {
        let order = pr
            .header
            .updated_date
            .cmp(&task.header.updated_date)
            .then(pr.header.revision.cmp(&task.header.revision));
        match order {
            Ordering::Greater => SyncVerdict::Propose {
                proposal: propose_for_task(pr_status, wanted, task, status),
            },
            Ordering::Less => SyncVerdict::Propose {
                proposal: propose_for_pr(pr, pr_status, class),
            },
            Ordering::Equal => SyncVerdict::Conflict {
                resolution: propose_for_task(pr_status, wanted, task, status),
            },
        }
    };

    Ok(SyncMapping {
        pr_id: pr.id().to_string(),
        task_id: task.id().to_string(),
        pr_status,
        task_status: status,
        task_state: task.header.state,
        pr_updated: pr.header.updated_date,
        task_updated: task.header.updated_date,
        pr_revision: pr.header.revision,
        task_revision: task.header.revision,
        verdict,
    })
}

/// Compare a PR with every task it closes.
pub fn analyze_pr(graph: &RelationshipGraph, pr_id: &str) -> Result<Vec<SyncMapping>> {
    let pr = graph
        .get(pr_id)
        .filter(|item| item.kind() == ItemKind::Pr)
        .ok_or_else(|| eyre::eyre!(Error::not_found(ItemKind::Pr, pr_id)))?;

    graph
        .linked_tasks(pr_id)
        .into_iter()
        .map(|task| compare(pr, task).map_err(|e| eyre::eyre!(Error::Validation(e))))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub pr_id: String,
    pub pr_status: PrStatus,
    pub linked_tasks: usize,
    pub in_sync: usize,
    pub out_of_sync: usize,
    pub conflicts: usize,
    pub mappings: Vec<SyncMapping>,
}

pub fn sync_status(graph: &RelationshipGraph, pr_id: &str) -> Result<SyncStatus> {
    let mappings = analyze_pr(graph, pr_id)?;
    let pr_status = graph
        .get(pr_id)
        .map(|pr| self::pr_status(pr))
        .transpose()
        .map_err(|e| eyre::eyre!(Error::Validation(e)))?
        .unwrap_or_default();
    let in_sync = mappings.iter().filter(|m| m.is_in_sync()).count();
    let conflicts = mappings.iter().filter(|m| m.is_conflict()).count();

    Ok(SyncStatus {
        pr_id: pr_id.to_string(),
        pr_status,
        linked_tasks: mappings.len(),
        in_sync,
        out_of_sync: mappings.len() - in_sync - conflicts,
        conflicts,
        mappings,
    })
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub force: bool,
    pub dry_run: bool,
    pub actor: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            actor: "workplan".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ActionOutcome {
    Applied,
    WouldApply,
    Blocked(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncAction {
    pub pr_id: String,
    pub task_id: String,
    pub direction: SyncDirection,
    pub change: SyncChange,
    pub outcome: ActionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub pr_id: String,
    pub dry_run: bool,
    pub actions: Vec<SyncAction>,
    /// Conflicts that were resolved by force.
    pub conflicts: Vec<SyncConflict>,
}

/// Bring a PR and its tasks back in line.
///
/// Unresolved conflicts abort before anything is written unless `force` is
/// set, in which case the PR side wins. Only the first change to the PR
/// itself is applied; later task-driven PR changes are skipped. Once the PR
/// has been changed its tasks are compared again against the new status.
pub fn sync_pr(project: &mut Project, pr_id: &str, options: &SyncOptions) -> Result<SyncReport> {
    let mut mappings = analyze_pr(project.graph(), pr_id)?;
    let conflicts: Vec<SyncConflict> = mappings.iter().filter_map(SyncMapping::conflict).collect();
    if !conflicts.is_empty() && !options.force {
        return Err(eyre::eyre!(Error::Conflict(conflicts)));
    }

    let mut report = SyncReport {
        pr_id: pr_id.to_string(),
        dry_run: options.dry_run,
        actions: Vec::new(),
        conflicts,
    };
    let mut pr_changed = false;

    loop {
        let mut recompare = false;

        for mapping in mappings {
            let (proposal, reason) = match mapping.verdict {
                SyncVerdict::InSync => continue,
                SyncVerdict::Propose { proposal } => (proposal, None),
                SyncVerdict::Conflict { resolution } if options.force => {
                    (resolution, Some(FORCED_OVERRIDE.to_string()))
                }
                SyncVerdict::Conflict { resolution } => {
                    report.actions.push(SyncAction {
                        pr_id: mapping.pr_id.clone(),
                        task_id: mapping.task_id,
                        direction: resolution.direction,
                        change: resolution.change,
                        outcome: ActionOutcome::Skipped(format!("conflicts with the updated {}", mapping.pr_id)),
                        reason: None,
                    });
                    continue;
                }
            };

            let mut action = SyncAction {
                pr_id: mapping.pr_id.clone(),
                task_id: mapping.task_id.clone(),
                direction: proposal.direction,
                change: proposal.change.clone(),
                outcome: ActionOutcome::Applied,
                reason,
            };

            if let Some(why) = proposal.blocked {
                log::warn!("Sync {} / {} blocked: {}", action.pr_id, action.task_id, why);
                action.outcome = ActionOutcome::Blocked(why);
                report.actions.push(action);
                continue;
            }
            if matches!(proposal.change, SyncChange::Pr { .. }) && pr_changed {
                action.outcome = ActionOutcome::Skipped(format!("{} already updated by this sync", action.pr_id));
                report.actions.push(action);
                continue;
            }
            if options.dry_run {
                action.outcome = ActionOutcome::WouldApply;
                report.actions.push(action);
                continue;
            }

            apply_change(project, &action, &options.actor)?;
            match &action.reason {
                Some(reason) => log::info!(
                    "Sync {} / {} ({:?}): {}",
                    action.pr_id,
                    action.task_id,
                    action.direction,
                    reason
                ),
                None => log::info!("Sync {} / {} ({:?})", action.pr_id, action.task_id, action.direction),
            }
            let changed_pr = matches!(action.change, SyncChange::Pr { .. });
            report.actions.push(action);
            if changed_pr {
                pr_changed = true;
                recompare = true;
                break;
            }
        }

        if !recompare {
            break;
        }
        // Outcomes not yet written are decided again against the new PR status.
        report.actions.retain(|a| a.outcome == ActionOutcome::Applied);
        log::debug!("{} changed, comparing its tasks again", pr_id);
        mappings = analyze_pr(project.graph(), pr_id)?;
    }

    Ok(report)
}

fn apply_change(project: &mut Project, action: &SyncAction, actor: &str) -> Result<Item> {
    let reason = action.reason.as_deref().unwrap_or("status sync");
    let (kind, id, mut patch, state) = match &action.change {
        SyncChange::Task { to, state, .. } => (
            ItemKind::Task,
            action.task_id.as_str(),
            Patch::new().set("status", to)?,
            *state,
        ),
        SyncChange::Pr { to, state, .. } => (
            ItemKind::Pr,
            action.pr_id.as_str(),
            Patch::new().set("pr_status", to)?.unset("status"),
            *state,
        ),
    };

    if let Some(state) = state {
        let current = project.store().load(kind, id)?;
        let moved =
            transition_state(&current, state, actor, Some(reason)).map_err(|e| eyre::eyre!(e))?;
        patch = patch
            .set("state", moved.header.state)?
            .set("state_metadata", &moved.header.state_metadata)?;
    }
    project.update_item(kind, id, &patch)
}
