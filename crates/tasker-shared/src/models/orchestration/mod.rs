//! # Orchestration Projections
//!
//! Derived, read-only views over the durable model: per-step readiness and
//! per-task execution context. These are the only inputs scheduling decisions
//! consume; they always reflect the latest committed transitions.
//!
//! The projections are computed in-process from a handful of targeted queries
//! per task rather than as database views; the field semantics are the
//! contract, not the storage.

pub mod backoff;
pub mod execution_context;
pub mod step_readiness;
pub mod workflow_summary;

pub use backoff::{BackoffCalculator, BackoffInput};
pub use execution_context::{
    ExecutionStatus, HealthStatus, RecommendedAction, TaskExecutionContext,
};
pub use step_readiness::StepReadiness;
pub use workflow_summary::{ParallelismPotential, TaskWorkflowSummary, WorkflowEfficiency};
