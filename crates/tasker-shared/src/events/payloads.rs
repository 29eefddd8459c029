//! # Payload Builders
//!
//! Standardized payload shapes per event family. Every payload carries the
//! event type, a timestamp, and the correlation id when present; the builders
//! add the family-specific fields so publishers never assemble JSON by hand.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::core::workflow_step::WorkflowStep;

/// The envelope delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    pub timestamp: NaiveDateTime,
    pub correlation_id: Option<Uuid>,
    pub data: Value,
}

impl EventPayload {
    pub fn new(event_type: &str, correlation_id: Option<Uuid>, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: chrono::Utc::now().naive_utc(),
            correlation_id,
            data,
        }
    }
}

/// Shared fields of every step event payload
fn step_base(task_uuid: Uuid, step: &WorkflowStep, step_name: &str) -> Value {
    json!({
        "task_id": task_uuid,
        "step_id": step.workflow_step_uuid,
        "step_name": step_name,
        "started_at": step.last_attempted_at,
        "completed_at": step.processed_at,
        "attempt_number": step.attempts,
        "retry_limit": step.retry_limit,
    })
}

/// Payload for `step.completed`, including the execution duration measured
/// from the attempt start to result persistence
pub fn step_completed_payload(
    event_type: &str,
    step: &WorkflowStep,
    step_name: &str,
    correlation_id: Option<Uuid>,
) -> EventPayload {
    let mut data = step_base(step.task_uuid, step, step_name);
    let duration_seconds = match (step.last_attempted_at, step.processed_at) {
        (Some(started), Some(finished)) => {
            Some((finished - started).num_milliseconds() as f64 / 1000.0)
        }
        _ => None,
    };
    data["execution_duration"] = json!(duration_seconds);
    EventPayload::new(event_type, correlation_id, data)
}

/// Payload for `step.failed`, carrying the error triple
pub fn step_failed_payload(
    event_type: &str,
    step: &WorkflowStep,
    step_name: &str,
    correlation_id: Option<Uuid>,
    error_message: &str,
    exception_class: &str,
    backtrace: Option<&str>,
) -> EventPayload {
    let mut data = step_base(step.task_uuid, step, step_name);
    data["error_message"] = json!(error_message);
    data["exception_class"] = json!(exception_class);
    data["backtrace"] = json!(backtrace);
    EventPayload::new(event_type, correlation_id, data)
}

/// Payload for the remaining step events (execution_requested, cancelled,
/// retry_requested, resolved_manually)
pub fn step_event_payload(
    event_type: &str,
    step: &WorkflowStep,
    step_name: &str,
    correlation_id: Option<Uuid>,
) -> EventPayload {
    EventPayload::new(
        event_type,
        correlation_id,
        step_base(step.task_uuid, step, step_name),
    )
}

/// Inputs for a task event payload
#[derive(Debug, Clone)]
pub struct TaskPayloadInputs {
    pub task_uuid: Uuid,
    pub task_name: String,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    /// Terminal payloads report total duration; live ones report current
    pub terminal: bool,
    pub total_steps: u32,
    pub completed_steps: u32,
    pub failed_steps: u32,
    pub pending_steps: u32,
    pub correlation_id: Option<Uuid>,
}

/// Payload for the task event family. `total_execution_duration` and
/// `current_execution_duration` are mutually exclusive: the first appears iff
/// the task is terminal.
pub fn task_payload(event_type: &str, inputs: TaskPayloadInputs) -> EventPayload {
    let mut data = json!({
        "task_id": inputs.task_uuid,
        "task_name": inputs.task_name,
        "started_at": inputs.started_at,
        "total_steps": inputs.total_steps,
        "completed_steps": inputs.completed_steps,
        "failed_steps": inputs.failed_steps,
        "pending_steps": inputs.pending_steps,
    });

    if inputs.terminal {
        data["completed_at"] = json!(inputs.completed_at);
        let duration = match (inputs.started_at, inputs.completed_at) {
            (Some(started), Some(finished)) => {
                Some((finished - started).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        };
        data["total_execution_duration"] = json!(duration);
    } else {
        let duration = inputs.started_at.map(|started| {
            (chrono::Utc::now().naive_utc() - started).num_milliseconds() as f64 / 1000.0
        });
        data["current_execution_duration"] = json!(duration);
    }

    EventPayload::new(event_type, inputs.correlation_id, data)
}

/// Payload for the orchestration event family: event type, timestamp, and
/// free-form context
pub fn orchestration_payload(
    event_type: &str,
    correlation_id: Option<Uuid>,
    context: Value,
) -> EventPayload {
    EventPayload::new(event_type, correlation_id, context)
}
