//! # Error Types
//!
//! The `TaskerError` taxonomy shared by every component. Handler-level errors
//! (retryable vs permanent) live with the step handler contract in the
//! orchestration crate; this module covers infrastructure and boundary errors.

use thiserror::Error;
use uuid::Uuid;

/// Result alias used throughout the workspace
pub type TaskerResult<T> = Result<T, TaskerError>;

/// Errors surfaced by the orchestration core
#[derive(Debug, Error)]
pub enum TaskerError {
    /// Rejected at a boundary: bad task name, invalid context, cycle-introducing
    /// edge, duplicate identity hash, out-of-range pagination
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Missing event registration, missing handler, missing database
    /// configuration. Fails fast at startup.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("database error during {operation}: {reason}")]
    DatabaseError { operation: String, reason: String },

    #[error("orchestration error: {0}")]
    OrchestrationError(String),

    /// A state machine rejected a transition outright (not in the table)
    #[error("invalid transition for {entity_type} {entity_uuid}: {from_state:?} -> {to_state}")]
    InvalidTransition {
        entity_type: String,
        entity_uuid: Uuid,
        from_state: Option<String>,
        to_state: String,
    },

    /// A transition guard failed: another worker won the race or the entity
    /// is not in a state that permits the transition. Callers skip and move on.
    #[error("transition guard failed for {entity_type} {entity_uuid}: {reason}")]
    GuardFailed {
        entity_type: String,
        entity_uuid: Uuid,
        reason: String,
    },

    #[error("event error: {0}")]
    EventError(String),
}

impl TaskerError {
    /// Shorthand for database errors carrying the failing operation name
    pub fn database(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        TaskerError::DatabaseError {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the error is a guard failure that callers should treat as
    /// "someone else got there first" rather than a fault
    pub fn is_guard_failure(&self) -> bool {
        matches!(self, TaskerError::GuardFailed { .. })
    }
}

impl From<sqlx::Error> for TaskerError {
    fn from(err: sqlx::Error) -> Self {
        TaskerError::DatabaseError {
            operation: "query".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TaskerError {
    fn from(err: serde_json::Error) -> Self {
        TaskerError::ValidationError(format!("invalid JSON payload: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_failure_detection() {
        let guard = TaskerError::GuardFailed {
            entity_type: "WorkflowStep".to_string(),
            entity_uuid: Uuid::now_v7(),
            reason: "not ready".to_string(),
        };
        assert!(guard.is_guard_failure());

        let other = TaskerError::ValidationError("bad name".to_string());
        assert!(!other.is_guard_failure());
    }

    #[test]
    fn test_database_shorthand() {
        let err = TaskerError::database("load_step", "connection reset");
        match err {
            TaskerError::DatabaseError { operation, reason } => {
                assert_eq!(operation, "load_step");
                assert_eq!(reason, "connection reset");
            }
            _ => panic!("expected DatabaseError"),
        }
    }

    #[test]
    fn test_display_includes_context() {
        let err = TaskerError::InvalidTransition {
            entity_type: "Task".to_string(),
            entity_uuid: Uuid::nil(),
            from_state: Some("complete".to_string()),
            to_state: "pending".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Task"));
        assert!(msg.contains("pending"));
    }
}
