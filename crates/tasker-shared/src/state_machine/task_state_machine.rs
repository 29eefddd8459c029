//! # Task State Machine
//!
//! Drives the task FSM against the transition history. Transitioning to the
//! current state is a successful no-op that writes no row and publishes no
//! event. The `in_progress -> complete` transition is guarded by the
//! execution context reporting all steps complete.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::errors::{TaskerError, TaskerResult};
use crate::events::payloads::{task_payload, TaskPayloadInputs};
use crate::events::names;
use crate::models::core::task::Task;
use crate::models::core::task_transition::{NewTaskTransition, TaskTransition};
use crate::models::orchestration::{ExecutionStatus, TaskExecutionContext};
use crate::system_context::SystemContext;

use super::events::TaskEvent;
use super::states::TaskState;
use super::TransitionOutcome;

/// All (from, to) pairs the task FSM permits
pub fn transition_allowed(from: Option<TaskState>, to: TaskState) -> bool {
    let events = [
        TaskEvent::Initialize,
        TaskEvent::Start,
        TaskEvent::Complete,
        TaskEvent::Fail(String::new()),
        TaskEvent::Retry,
        TaskEvent::Cancel,
        TaskEvent::ResolveManually,
    ];
    events
        .iter()
        .any(|event| event.target_state() == to && event.allowed_sources().contains(&from))
}

#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    task: Task,
    context: Arc<SystemContext>,
    triggered_by: &'static str,
}

impl TaskStateMachine {
    pub fn new(task: Task, context: Arc<SystemContext>) -> Self {
        Self {
            task,
            context,
            triggered_by: "task_state_machine",
        }
    }

    /// Record which component drives this machine in transition metadata
    pub fn with_triggered_by(mut self, component: &'static str) -> Self {
        self.triggered_by = component;
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub async fn current_state(&self) -> TaskerResult<Option<TaskState>> {
        let current = TaskTransition::get_current(self.context.database_pool(), self.task.task_uuid)
            .await?;
        current
            .map(|t| TaskState::from_str(&t.to_state).map_err(TaskerError::OrchestrationError))
            .transpose()
    }

    /// Whether the FSM table permits moving to `target` from the current
    /// state. Guards still apply at transition time.
    pub async fn can_transition_to(&self, target: TaskState) -> TaskerResult<bool> {
        let current = self.current_state().await?;
        Ok(transition_allowed(current, target))
    }

    /// Fire an event. Same-state requests succeed as a no-op; table or guard
    /// violations surface as errors the caller can match on.
    pub async fn transition(
        &mut self,
        event: TaskEvent,
    ) -> TaskerResult<TransitionOutcome<TaskState>> {
        let target = event.target_state();
        let current = self.current_state().await?;

        if current == Some(target) {
            debug!(
                task_uuid = %self.task.task_uuid,
                state = %target,
                "Task already in target state; transition is a no-op"
            );
            return Ok(TransitionOutcome::AlreadyInState(target));
        }

        if !event.allowed_sources().contains(&current) {
            return Err(TaskerError::InvalidTransition {
                entity_type: "Task".to_string(),
                entity_uuid: self.task.task_uuid,
                from_state: current.map(|s| s.to_string()),
                to_state: target.to_string(),
            });
        }

        // Completion is only legal once every step has landed
        if matches!(event, TaskEvent::Complete) {
            let execution_context = self.execution_context().await?;
            let status = execution_context.map(|c| c.execution_status);
            if status != Some(ExecutionStatus::AllComplete) {
                return Err(TaskerError::GuardFailed {
                    entity_type: "Task".to_string(),
                    entity_uuid: self.task.task_uuid,
                    reason: format!(
                        "cannot complete task with execution status {status:?}"
                    ),
                });
            }
        }

        let mut metadata = json!({
            "triggered_by": self.triggered_by,
            "correlation_id": self.task.correlation_id,
        });
        if let TaskEvent::Fail(reason) = &event {
            metadata["error"] = json!(reason);
        }

        let expected_from: Vec<Option<String>> = event
            .allowed_sources()
            .iter()
            .map(|s| s.map(|s| s.to_string()))
            .collect();
        let expected_refs: Vec<Option<&str>> =
            expected_from.iter().map(|s| s.as_deref()).collect();

        TaskTransition::create_guarded(
            self.context.database_pool(),
            NewTaskTransition {
                task_uuid: self.task.task_uuid,
                to_state: target.to_string(),
                from_state: current.map(|s| s.to_string()),
                metadata: Some(metadata),
            },
            &expected_refs,
        )
        .await?;

        if target == TaskState::Complete {
            Task::mark_complete(self.context.database_pool(), self.task.task_uuid).await?;
        }

        self.publish_transition_event(&event, target).await;

        Ok(TransitionOutcome::Transitioned(target))
    }

    async fn execution_context(&self) -> TaskerResult<Option<TaskExecutionContext>> {
        TaskExecutionContext::for_task(
            self.context.database_pool(),
            self.task.task_uuid,
            self.context.backoff(),
        )
        .await
    }

    /// Publish the event for a committed transition. Failures here are logged
    /// and never unwind the transition itself.
    async fn publish_transition_event(&self, event: &TaskEvent, target: TaskState) {
        let event_name = match event {
            TaskEvent::Initialize => names::TASK_INITIALIZE_REQUESTED,
            TaskEvent::Start => names::TASK_STARTED,
            TaskEvent::Complete => names::TASK_COMPLETED,
            TaskEvent::Fail(_) => names::TASK_FAILED,
            TaskEvent::Retry => names::TASK_RETRY_REQUESTED,
            TaskEvent::Cancel => names::TASK_CANCELLED,
            TaskEvent::ResolveManually => names::TASK_RESOLVED_MANUALLY,
        };

        let pool = self.context.database_pool();
        let counts = match self.execution_context().await {
            Ok(Some(c)) => c,
            _ => TaskExecutionContext::from_readiness(self.task.task_uuid, &[]),
        };

        let task_name: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM named_tasks WHERE named_task_uuid = $1",
        )
        .bind(self.task.named_task_uuid)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten();

        let started_at: Option<chrono::NaiveDateTime> =
            sqlx::query_as::<_, (Option<chrono::NaiveDateTime>,)>(
                "SELECT MIN(created_at) FROM task_transitions \
                 WHERE task_uuid = $1 AND to_state = 'in_progress'",
            )
            .bind(self.task.task_uuid)
            .fetch_one(pool)
            .await
            .ok()
            .and_then(|(t,)| t);

        let terminal = target.is_terminal();
        let payload = task_payload(
            event_name,
            TaskPayloadInputs {
                task_uuid: self.task.task_uuid,
                task_name: task_name.map(|(n,)| n).unwrap_or_default(),
                started_at,
                completed_at: terminal.then(|| chrono::Utc::now().naive_utc()),
                terminal,
                total_steps: counts.total_steps,
                completed_steps: counts.completed_steps,
                failed_steps: counts.failed_steps,
                pending_steps: counts.pending_steps,
                correlation_id: Some(self.task.correlation_id),
            },
        );

        if let Err(e) = self.context.event_publisher().publish(event_name, payload) {
            warn!(
                task_uuid = %self.task.task_uuid,
                event = event_name,
                error = %e,
                "Failed to publish task transition event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_matches_specified_graph() {
        use TaskState::*;

        assert!(transition_allowed(None, Pending));
        assert!(transition_allowed(Some(Pending), InProgress));
        assert!(transition_allowed(Some(InProgress), Complete));
        assert!(transition_allowed(Some(InProgress), Error));
        assert!(transition_allowed(Some(Error), Pending));
        assert!(transition_allowed(Some(InProgress), Cancelled));
        assert!(transition_allowed(Some(Pending), Cancelled));
        assert!(transition_allowed(Some(Error), ResolvedManually));

        // Forbidden paths
        assert!(!transition_allowed(Some(Pending), Complete));
        assert!(!transition_allowed(Some(Complete), Pending));
        assert!(!transition_allowed(Some(Complete), InProgress));
        assert!(!transition_allowed(Some(Error), Complete));
        assert!(!transition_allowed(Some(Cancelled), InProgress));
        assert!(!transition_allowed(None, InProgress));
    }
}
