//! Error taxonomy for workplan operations.
//!
//! Structured errors travel inside `eyre::Report`; callers recover them with
//! `report.downcast_ref::<Error>()`.

use crate::reconcile::SyncConflict;
use crate::types::{ItemKind, State};
use std::fmt;
use std::path::PathBuf;

/// Errors that can occur during workplan operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// An unknown id was referenced.
    NotFound { kind: Option<ItemKind>, id: String },
    /// An item file could not be parsed.
    Parse { path: PathBuf, message: String },
    /// A rule was violated: illegal transition, cycle, dangling reference.
    Validation(ValidationError),
    /// PR/task reconciliation cannot decide on its own.
    Conflict(Vec<SyncConflict>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound { kind: Some(kind), id } => write!(f, "{} not found: {}", kind, id),
            Error::NotFound { kind: None, id } => write!(f, "item not found: {}", id),
            Error::Parse { path, message } => write!(f, "failed to parse {}: {}", path.display(), message),
            Error::Validation(e) => write!(f, "validation error: {}", e),
            Error::Conflict(conflicts) => {
                write!(f, "{} sync conflict(s):", conflicts.len())?;
                for c in conflicts {
                    write!(
                        f,
                        " {} ({}, updated {}) vs {} ({}, updated {});",
                        c.pr_id, c.pr_status, c.pr_updated, c.task_id, c.task_status, c.task_updated
                    )?;
                }
                write!(f, " rerun with force to apply the PR side")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}

impl Error {
    pub fn not_found(kind: ItemKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: Some(kind),
            id: id.into(),
        }
    }
}

/// Rule violations.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyTitle,
    InvalidId(String),
    DuplicateId(String),
    StateMetadataMismatch(String),
    InvalidTimestamp(String),
    MissingField { item_id: String, field: &'static str },
    InvalidTransition { from: State, to: State, allowed: Vec<State> },
    CycleDetected { path: Vec<String> },
    SelfDependency(String),
    WrongKind { id: String, expected: ItemKind, actual: ItemKind },
    DanglingReference { item_id: String, field: &'static str, target_id: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyTitle => write!(f, "title cannot be empty"),
            ValidationError::InvalidId(id) => write!(f, "invalid id '{}': expected PREFIX-NNNN", id),
            ValidationError::DuplicateId(id) => write!(f, "{} already exists", id),
            ValidationError::StateMetadataMismatch(id) => {
                write!(f, "{}: state and state_metadata must be set together", id)
            }
            ValidationError::InvalidTimestamp(id) => write!(f, "{}: updated_date is before created_date", id),
            ValidationError::MissingField { item_id, field } => write!(f, "{}: missing {}", item_id, field),
            ValidationError::InvalidTransition { from, to, allowed } => {
                let allowed: Vec<&str> = allowed.iter().map(State::as_str).collect();
                write!(
                    f,
                    "invalid state transition from {} to {} (allowed: {})",
                    from,
                    to,
                    if allowed.is_empty() {
                        "none".to_string()
                    } else {
                        allowed.join(", ")
                    }
                )
            }
            ValidationError::CycleDetected { path } => {
                write!(f, "dependency cycle detected: {}", path.join(" -> "))
            }
            ValidationError::SelfDependency(id) => write!(f, "{} cannot depend on itself", id),
            ValidationError::WrongKind { id, expected, actual } => {
                write!(f, "{} is a {}, expected a {}", id, actual, expected)
            }
            ValidationError::DanglingReference {
                item_id,
                field,
                target_id,
            } => write!(f, "{}.{} references unknown item {}", item_id, field, target_id),
        }
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_lists_alternatives() {
        let err = ValidationError::InvalidTransition {
            from: State::Planning,
            to: State::Done,
            allowed: vec![State::Active, State::WontDo],
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition from planning to done (allowed: active, won_t_do)"
        );
    }

    #[test]
    fn test_cycle_error_shows_path() {
        let err = Error::Validation(ValidationError::CycleDetected {
            path: vec!["PR-0001".into(), "PR-0002".into()],
        });
        assert_eq!(
            err.to_string(),
            "validation error: dependency cycle detected: PR-0001 -> PR-0002"
        );
    }

    #[test]
    fn test_downcast_through_eyre() {
        let report = eyre::eyre!(Error::not_found(ItemKind::Epic, "EP-0009"));
        let err = report.downcast_ref::<Error>().unwrap();
        assert_eq!(err, &Error::not_found(ItemKind::Epic, "EP-0009"));
    }
}
