//! # States
//!
//! The task and workflow-step state sets. Persisted as snake_case strings in
//! the transition tables; parsing an unknown string is an error rather than a
//! silent default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task lifecycle states. `error` is re-entrant (retry moves the task back to
/// pending); complete, cancelled, and resolved_manually are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InProgress,
    Complete,
    Error,
    Cancelled,
    ResolvedManually,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Complete | TaskState::Cancelled | TaskState::ResolvedManually
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Complete => "complete",
            TaskState::Error => "error",
            TaskState::Cancelled => "cancelled",
            TaskState::ResolvedManually => "resolved_manually",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "in_progress" => Ok(TaskState::InProgress),
            "complete" => Ok(TaskState::Complete),
            "error" => Ok(TaskState::Error),
            "cancelled" => Ok(TaskState::Cancelled),
            "resolved_manually" => Ok(TaskState::ResolvedManually),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// Workflow step lifecycle states. A step counts as complete for dependency
/// purposes when it is complete or resolved_manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStepState {
    Pending,
    InProgress,
    Complete,
    Failed,
    Cancelled,
    ResolvedManually,
}

impl WorkflowStepState {
    /// Complete for dependency-satisfaction purposes
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(
            self,
            WorkflowStepState::Complete | WorkflowStepState::ResolvedManually
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStepState::Complete
                | WorkflowStepState::Cancelled
                | WorkflowStepState::ResolvedManually
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStepState::Pending => "pending",
            WorkflowStepState::InProgress => "in_progress",
            WorkflowStepState::Complete => "complete",
            WorkflowStepState::Failed => "failed",
            WorkflowStepState::Cancelled => "cancelled",
            WorkflowStepState::ResolvedManually => "resolved_manually",
        }
    }
}

impl fmt::Display for WorkflowStepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStepState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkflowStepState::Pending),
            "in_progress" => Ok(WorkflowStepState::InProgress),
            "complete" => Ok(WorkflowStepState::Complete),
            "failed" => Ok(WorkflowStepState::Failed),
            "cancelled" => Ok(WorkflowStepState::Cancelled),
            "resolved_manually" => Ok(WorkflowStepState::ResolvedManually),
            other => Err(format!("unknown workflow step state: {other}")),
        }
    }
}
