//! # State Machines
//!
//! Database-backed state machines for tasks and workflow steps. Transitions
//! are expressed as a table keyed by (from_state, to_state); the idempotent
//! same-state rule lives in the shared dispatcher, not in each machine.
//! Every successful transition appends a history row and publishes an event.

pub mod events;
pub mod states;
pub mod step_state_machine;
pub mod task_state_machine;

pub use events::{StepEvent, TaskEvent};
pub use states::{TaskState, WorkflowStepState};
pub use step_state_machine::StepStateMachine;
pub use task_state_machine::TaskStateMachine;

/// Result of asking a state machine to transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome<S> {
    /// A new transition row was written and an event published
    Transitioned(S),
    /// The entity was already in the target state; no row, no event
    AlreadyInState(S),
}

impl<S: Copy> TransitionOutcome<S> {
    pub fn state(&self) -> S {
        match self {
            TransitionOutcome::Transitioned(s) | TransitionOutcome::AlreadyInState(s) => *s,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, TransitionOutcome::AlreadyInState(_))
    }
}
