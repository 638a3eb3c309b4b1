//! Unified lifecycle state machine.

use crate::error::{Error, ValidationError};
use crate::types::{Item, ItemDetail, PrStatus, State, StateMetadata, Status};
use chrono::Utc;
use serde::Serialize;

/// States reachable from `from` in one step.
pub fn allowed_transitions(from: State) -> &'static [State] {
    use State::*;
    match from {
        Planning => &[Active, ReadyForEngineering, WontDo, Archived],
        ReadyForEngineering => &[Active, Planning, WontDo],
        Active => &[ReadyForQa, ReadyForEngineering, Completed, Planning, WontDo],
        ReadyForQa => &[ReadyForDeployment, Active, ReadyForEngineering, WontDo],
        ReadyForDeployment => &[Done, ReadyForQa, Active],
        Completed => &[Done, Archived, Active],
        Done => &[Archived, Active],
        WontDo => &[Planning, Archived],
        Archived => &[Planning],
    }
}

/// Outcome of `validate_transition`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn validate_transition(from: State, to: State) -> TransitionCheck {
    match check_transition(from, to) {
        Ok(()) => TransitionCheck { valid: true, error: None },
        Err(e) => TransitionCheck {
            valid: false,
            error: Some(e.to_string()),
        },
    }
}

fn check_transition(from: State, to: State) -> Result<(), ValidationError> {
    let allowed = allowed_transitions(from);
    if allowed.contains(&to) {
        Ok(())
    } else {
        Err(ValidationError::InvalidTransition {
            from,
            to,
            allowed: allowed.to_vec(),
        })
    }
}

/// State implied by a legacy work status.
pub fn state_for_status(status: Status) -> State {
    match status {
        Status::Planning | Status::Todo => State::Planning,
        Status::Active | Status::InProgress | Status::Blocked => State::Active,
        Status::Completed | Status::Done => State::Done,
        Status::Archived => State::Archived,
    }
}

/// State implied by a PR status.
pub fn state_for_pr_status(status: PrStatus) -> State {
    match status {
        PrStatus::Draft => State::Planning,
        PrStatus::Open => State::Active,
        PrStatus::Review => State::ReadyForQa,
        PrStatus::Approved => State::ReadyForDeployment,
        PrStatus::Merged => State::Done,
        PrStatus::Closed => State::Archived,
    }
}

/// The state implied by the legacy status field alone.
pub fn legacy_state(item: &Item) -> State {
    match &item.detail {
        ItemDetail::Pr(d) => state_for_pr_status(d.pr_status),
        ItemDetail::Epic(d) => state_for_status(d.status),
        ItemDetail::Issue(d) => state_for_status(d.status),
        ItemDetail::Task(d) => state_for_status(d.status),
    }
}

/// The state callers should act on: `state` when set, else the legacy mapping.
pub fn effective_state(item: &Item) -> State {
    item.header.state.unwrap_or_else(|| legacy_state(item))
}

/// Move an item to `to`, returning the updated copy.
///
/// `transitioned_at` never moves backwards, even if the clock does.
pub fn transition_state(item: &Item, to: State, actor: &str, reason: Option<&str>) -> Result<Item, Error> {
    let from = effective_state(item);
    check_transition(from, to)?;

    let mut now = Utc::now();
    let mut automation_eligible = false;
    if let Some(previous) = &item.header.state_metadata {
        now = now.max(previous.transitioned_at);
        automation_eligible = previous.automation_eligible;
    }

    let mut next = item.clone();
    next.header.state = Some(to);
    next.header.state_metadata = Some(StateMetadata {
        transitioned_at: now,
        transitioned_by: actor.to_string(),
        previous_state: Some(from),
        automation_eligible,
        automation_source: None,
        transition_reason: reason.map(String::from),
        reviewer: None,
    });
    Ok(next)
}
