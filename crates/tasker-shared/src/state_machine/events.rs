//! # Transition Events
//!
//! The events a caller may feed a state machine. Each event names its target
//! state; the machine's table decides whether the current state permits it.

use serde_json::Value;

use super::states::{TaskState, WorkflowStepState};

/// Events accepted by the task state machine
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Initialize,
    Start,
    Complete,
    Fail(String),
    Retry,
    Cancel,
    ResolveManually,
}

impl TaskEvent {
    pub fn target_state(&self) -> TaskState {
        match self {
            TaskEvent::Initialize => TaskState::Pending,
            TaskEvent::Start => TaskState::InProgress,
            TaskEvent::Complete => TaskState::Complete,
            TaskEvent::Fail(_) => TaskState::Error,
            TaskEvent::Retry => TaskState::Pending,
            TaskEvent::Cancel => TaskState::Cancelled,
            TaskEvent::ResolveManually => TaskState::ResolvedManually,
        }
    }

    /// States this event may fire from; `None` means "no transition yet"
    pub fn allowed_sources(&self) -> &'static [Option<TaskState>] {
        match self {
            TaskEvent::Initialize => &[None],
            TaskEvent::Start => &[Some(TaskState::Pending)],
            TaskEvent::Complete => &[Some(TaskState::InProgress)],
            TaskEvent::Fail(_) => &[Some(TaskState::InProgress)],
            TaskEvent::Retry => &[Some(TaskState::Error)],
            TaskEvent::Cancel => &[Some(TaskState::InProgress), Some(TaskState::Pending)],
            TaskEvent::ResolveManually => &[Some(TaskState::Error)],
        }
    }
}

/// Events accepted by the workflow step state machine
#[derive(Debug, Clone)]
pub enum StepEvent {
    /// Execution requested; guarded by step readiness
    Start,
    Complete(Option<Value>),
    Fail(String),
    Retry,
    Cancel,
    ResolveManually,
}

impl StepEvent {
    pub fn target_state(&self) -> WorkflowStepState {
        match self {
            StepEvent::Start => WorkflowStepState::InProgress,
            StepEvent::Complete(_) => WorkflowStepState::Complete,
            StepEvent::Fail(_) => WorkflowStepState::Failed,
            StepEvent::Retry => WorkflowStepState::Pending,
            StepEvent::Cancel => WorkflowStepState::Cancelled,
            StepEvent::ResolveManually => WorkflowStepState::ResolvedManually,
        }
    }

    pub fn allowed_sources(&self) -> &'static [Option<WorkflowStepState>] {
        match self {
            StepEvent::Start => &[
                Some(WorkflowStepState::Pending),
                Some(WorkflowStepState::Failed),
            ],
            StepEvent::Complete(_) => &[Some(WorkflowStepState::InProgress)],
            StepEvent::Fail(_) => &[Some(WorkflowStepState::InProgress)],
            StepEvent::Retry => &[Some(WorkflowStepState::Failed)],
            StepEvent::Cancel => &[
                Some(WorkflowStepState::Pending),
                Some(WorkflowStepState::InProgress),
            ],
            StepEvent::ResolveManually => &[Some(WorkflowStepState::Failed)],
        }
    }
}
