//! # Registry
//!
//! Task template registration and lookup. Templates are registered once at
//! startup; registration upserts the shared namespace/named-task/named-step
//! rows and validates the step graph before anything can instantiate it.

pub mod task_template_registry;

pub use task_template_registry::{StepTemplate, TaskTemplate, TaskTemplateRegistry};
