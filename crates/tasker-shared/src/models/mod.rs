//! # Models
//!
//! Durable entities and the derived projections built over them.

pub mod core;
pub mod orchestration;

pub use core::dependent_system::DependentSystem;
pub use core::named_step::NamedStep;
pub use core::named_task::NamedTask;
pub use core::task::Task;
pub use core::task_namespace::TaskNamespace;
pub use core::task_request::TaskRequest;
pub use core::workflow_step::WorkflowStep;
pub use core::workflow_step_edge::WorkflowStepEdge;
