//! # Orchestration
//!
//! The components of one orchestration iteration, leaves-first:
//! discovery finds the steps eligible to run, the executor runs them under
//! bounded parallelism, and the finalizer reads the execution context to
//! decide whether the task completes, fails, or goes back to the run queue.

pub mod bootstrap;
pub mod coordinator;
pub mod handlers;
pub mod step_executor;
pub mod task_finalizer;
pub mod task_initializer;
pub mod task_reenqueuer;
pub mod viable_step_discovery;

pub use bootstrap::OrchestrationSystem;
pub use coordinator::WorkflowCoordinator;
pub use handlers::{StepHandler, StepHandlerError, StepHandlerRegistry};
pub use step_executor::StepExecutor;
pub use task_finalizer::TaskFinalizer;
pub use task_initializer::TaskInitializer;
pub use task_reenqueuer::TaskReenqueuer;
pub use viable_step_discovery::{ProcessingMode, ViableStepDiscovery};
