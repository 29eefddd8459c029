//! # Event Names
//!
//! The consolidated event vocabulary. One name per semantic event; custom
//! events live outside the reserved prefixes.

pub const TASK_INITIALIZE_REQUESTED: &str = "task.initialize_requested";
pub const TASK_STARTED: &str = "task.started";
pub const TASK_COMPLETED: &str = "task.completed";
pub const TASK_FAILED: &str = "task.failed";
pub const TASK_RETRY_REQUESTED: &str = "task.retry_requested";
pub const TASK_CANCELLED: &str = "task.cancelled";
pub const TASK_RESOLVED_MANUALLY: &str = "task.resolved_manually";

pub const STEP_EXECUTION_REQUESTED: &str = "step.execution_requested";
pub const STEP_COMPLETED: &str = "step.completed";
pub const STEP_FAILED: &str = "step.failed";
pub const STEP_RETRY_REQUESTED: &str = "step.retry_requested";
pub const STEP_CANCELLED: &str = "step.cancelled";
pub const STEP_RESOLVED_MANUALLY: &str = "step.resolved_manually";

pub const WORKFLOW_ITERATION_STARTED: &str = "workflow.iteration_started";
pub const WORKFLOW_VIABLE_STEPS_DISCOVERED: &str = "workflow.viable_steps_discovered";
pub const WORKFLOW_NO_VIABLE_STEPS: &str = "workflow.no_viable_steps";
pub const WORKFLOW_TASK_REENQUEUE_STARTED: &str = "workflow.task_reenqueue_started";
pub const WORKFLOW_TASK_REENQUEUE_FAILED: &str = "workflow.task_reenqueue_failed";
pub const WORKFLOW_TASK_REENQUEUE_DELAYED: &str = "workflow.task_reenqueue_delayed";

/// Prefixes custom events may not use
pub const RESERVED_PREFIXES: &[&str] = &["task.", "step.", "workflow.", "observability."];

/// Every event the core itself may publish
pub fn standard_events() -> &'static [&'static str] {
    &[
        TASK_INITIALIZE_REQUESTED,
        TASK_STARTED,
        TASK_COMPLETED,
        TASK_FAILED,
        TASK_RETRY_REQUESTED,
        TASK_CANCELLED,
        TASK_RESOLVED_MANUALLY,
        STEP_EXECUTION_REQUESTED,
        STEP_COMPLETED,
        STEP_FAILED,
        STEP_RETRY_REQUESTED,
        STEP_CANCELLED,
        STEP_RESOLVED_MANUALLY,
        WORKFLOW_ITERATION_STARTED,
        WORKFLOW_VIABLE_STEPS_DISCOVERED,
        WORKFLOW_NO_VIABLE_STEPS,
        WORKFLOW_TASK_REENQUEUE_STARTED,
        WORKFLOW_TASK_REENQUEUE_FAILED,
        WORKFLOW_TASK_REENQUEUE_DELAYED,
    ]
}
