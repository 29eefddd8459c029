//! # Tasker Orchestration
//!
//! The workflow orchestration system: viable step discovery, the bounded
//! concurrent step executor, the task finalizer and reenqueuer, and the
//! orchestration loop that drives a task until it terminates or defers back
//! to the run queue. The web module exposes the thin HTTP adapters over the
//! core.

pub mod metrics;
pub mod orchestration;
pub mod web;
