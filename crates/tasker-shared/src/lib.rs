//! # Tasker Shared
//!
//! Shared components for the Tasker workflow orchestration system:
//!
//! - **models**: durable entities (tasks, workflow steps, edges, transitions)
//!   and the readiness projections that drive scheduling decisions
//! - **state_machine**: database-backed task and step state machines
//! - **events**: in-process publish/subscribe bus with typed payload builders
//! - **registry**: task template registration and lookup
//! - **config / database / logging / errors**: ambient infrastructure shared
//!   by the orchestration system and its tests

pub mod config;
pub mod database;
pub mod errors;
pub mod events;
pub mod identity;
pub mod logging;
pub mod models;
pub mod registry;
pub mod state_machine;
pub mod system_context;

pub use errors::{TaskerError, TaskerResult};
pub use system_context::SystemContext;
