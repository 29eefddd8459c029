//! # Step State Machine
//!
//! Drives the workflow step FSM. The `pending|failed -> in_progress`
//! transition is guarded by step readiness, and the guarded history insert
//! means two workers racing the same step produce exactly one winner; the
//! loser observes a guard failure and skips the step.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};
use crate::events::names;
use crate::events::payloads::{step_completed_payload, step_event_payload, step_failed_payload};
use crate::models::core::workflow_step::WorkflowStep;
use crate::models::core::workflow_step_transition::{
    NewWorkflowStepTransition, WorkflowStepTransition,
};
use crate::models::orchestration::StepReadiness;
use crate::system_context::SystemContext;

use super::events::StepEvent;
use super::states::WorkflowStepState;
use super::TransitionOutcome;

/// All (from, to) pairs the step FSM permits
pub fn transition_allowed(from: Option<WorkflowStepState>, to: WorkflowStepState) -> bool {
    // nil -> pending happens implicitly at creation; other targets come from
    // the event table
    if from.is_none() && to == WorkflowStepState::Pending {
        return true;
    }
    let events = [
        StepEvent::Start,
        StepEvent::Complete(None),
        StepEvent::Fail(String::new()),
        StepEvent::Retry,
        StepEvent::Cancel,
        StepEvent::ResolveManually,
    ];
    events
        .iter()
        .any(|event| event.target_state() == to && event.allowed_sources().contains(&from))
}

#[derive(Debug, Clone)]
pub struct StepStateMachine {
    step: WorkflowStep,
    context: Arc<SystemContext>,
    triggered_by: &'static str,
    step_name: Option<String>,
    correlation_id: Option<Uuid>,
}

impl StepStateMachine {
    pub fn new(step: WorkflowStep, context: Arc<SystemContext>) -> Self {
        Self {
            step,
            context,
            triggered_by: "step_state_machine",
            step_name: None,
            correlation_id: None,
        }
    }

    /// Record which component drives this machine in transition metadata
    pub fn with_triggered_by(mut self, component: &'static str) -> Self {
        self.triggered_by = component;
        self
    }

    pub fn step(&self) -> &WorkflowStep {
        &self.step
    }

    /// Current state per the history; a step with no transition rows yet is
    /// implicitly pending
    pub async fn current_state(&self) -> TaskerResult<WorkflowStepState> {
        let current = WorkflowStepTransition::get_current(
            self.context.database_pool(),
            self.step.workflow_step_uuid,
        )
        .await?;
        match current {
            Some(t) => WorkflowStepState::from_str(&t.to_state)
                .map_err(TaskerError::OrchestrationError),
            None => Ok(WorkflowStepState::Pending),
        }
    }

    /// Whether the FSM table permits moving to `target` from the current
    /// state. The readiness guard still applies at transition time.
    pub async fn can_transition_to(&self, target: WorkflowStepState) -> TaskerResult<bool> {
        let current = self.current_state().await?;
        Ok(transition_allowed(Some(current), target))
    }

    /// Fire an event. Same-state requests succeed as a no-op.
    pub async fn transition(
        &mut self,
        event: StepEvent,
    ) -> TaskerResult<TransitionOutcome<WorkflowStepState>> {
        let target = event.target_state();
        let current = self.current_state().await?;

        if current == target {
            debug!(
                step_uuid = %self.step.workflow_step_uuid,
                state = %target,
                "Step already in target state; transition is a no-op"
            );
            return Ok(TransitionOutcome::AlreadyInState(target));
        }

        if !event.allowed_sources().contains(&Some(current)) {
            return Err(TaskerError::InvalidTransition {
                entity_type: "WorkflowStep".to_string(),
                entity_uuid: self.step.workflow_step_uuid,
                from_state: Some(current.to_string()),
                to_state: target.to_string(),
            });
        }

        // Execution may only start on a step the readiness projection reports
        // ready; this is the half of the double-start defense the database
        // row lock cannot express.
        if matches!(event, StepEvent::Start) {
            let readiness = self.load_readiness().await?;
            match readiness {
                Some(r) if r.ready_for_execution => {}
                other => {
                    return Err(TaskerError::GuardFailed {
                        entity_type: "WorkflowStep".to_string(),
                        entity_uuid: self.step.workflow_step_uuid,
                        reason: match other {
                            Some(r) => format!(
                                "step not ready (state={}, deps_satisfied={}, retry_eligible={})",
                                r.current_state, r.dependencies_satisfied, r.retry_eligible
                            ),
                            None => "no readiness entry for step".to_string(),
                        },
                    });
                }
            }
        }

        let correlation_id = self.correlation_id().await;
        let mut metadata = json!({
            "triggered_by": self.triggered_by,
            "correlation_id": correlation_id,
        });
        if let StepEvent::Fail(reason) = &event {
            metadata["error"] = json!(reason);
        }

        // A step with no transition rows is implicitly pending, so events
        // firing from pending must also accept the no-row case.
        let mut expected_from: Vec<Option<String>> = event
            .allowed_sources()
            .iter()
            .map(|s| s.map(|s| s.to_string()))
            .collect();
        if event
            .allowed_sources()
            .contains(&Some(WorkflowStepState::Pending))
        {
            expected_from.push(None);
        }
        let expected_refs: Vec<Option<&str>> =
            expected_from.iter().map(|s| s.as_deref()).collect();

        WorkflowStepTransition::create_guarded(
            self.context.database_pool(),
            NewWorkflowStepTransition {
                workflow_step_uuid: self.step.workflow_step_uuid,
                to_state: target.to_string(),
                from_state: Some(current.to_string()),
                metadata: Some(metadata),
            },
            &expected_refs,
        )
        .await?;

        self.publish_transition_event(&event).await;

        Ok(TransitionOutcome::Transitioned(target))
    }

    async fn load_readiness(&self) -> TaskerResult<Option<StepReadiness>> {
        let all = StepReadiness::for_task(
            self.context.database_pool(),
            self.step.task_uuid,
            self.context.backoff(),
        )
        .await?;
        Ok(all
            .into_iter()
            .find(|r| r.workflow_step_uuid == self.step.workflow_step_uuid))
    }

    async fn step_name(&mut self) -> String {
        if let Some(name) = &self.step_name {
            return name.clone();
        }
        let name: Option<(String,)> =
            sqlx::query_as("SELECT name FROM named_steps WHERE named_step_uuid = $1")
                .bind(self.step.named_step_uuid)
                .fetch_optional(self.context.database_pool())
                .await
                .ok()
                .flatten();
        let name = name.map(|(n,)| n).unwrap_or_default();
        self.step_name = Some(name.clone());
        name
    }

    async fn correlation_id(&mut self) -> Option<Uuid> {
        if self.correlation_id.is_some() {
            return self.correlation_id;
        }
        let id: Option<(Uuid,)> =
            sqlx::query_as("SELECT correlation_id FROM tasks WHERE task_uuid = $1")
                .bind(self.step.task_uuid)
                .fetch_optional(self.context.database_pool())
                .await
                .ok()
                .flatten();
        self.correlation_id = id.map(|(c,)| c);
        self.correlation_id
    }

    /// Publish the event for a committed transition. Payloads are built from
    /// a fresh row so post-persistence fields (processed_at, results) are
    /// accurate. Failures are logged, never propagated.
    async fn publish_transition_event(&mut self, event: &StepEvent) {
        let step_name = self.step_name().await;
        let correlation_id = self.correlation_id().await;

        let fresh = WorkflowStep::find_by_id(
            self.context.database_pool(),
            self.step.workflow_step_uuid,
        )
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| self.step.clone());

        let (event_name, payload) = match event {
            StepEvent::Start => (
                names::STEP_EXECUTION_REQUESTED,
                step_event_payload(
                    names::STEP_EXECUTION_REQUESTED,
                    &fresh,
                    &step_name,
                    correlation_id,
                ),
            ),
            StepEvent::Complete(_) => (
                names::STEP_COMPLETED,
                step_completed_payload(names::STEP_COMPLETED, &fresh, &step_name, correlation_id),
            ),
            StepEvent::Fail(message) => {
                let results = fresh.results.clone().unwrap_or_default();
                let exception_class = results
                    .get("error_class")
                    .and_then(|v| v.as_str())
                    .unwrap_or("StepExecutionError")
                    .to_string();
                let backtrace = results
                    .get("backtrace")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                (
                    names::STEP_FAILED,
                    step_failed_payload(
                        names::STEP_FAILED,
                        &fresh,
                        &step_name,
                        correlation_id,
                        message,
                        &exception_class,
                        backtrace.as_deref(),
                    ),
                )
            }
            StepEvent::Retry => (
                names::STEP_RETRY_REQUESTED,
                step_event_payload(
                    names::STEP_RETRY_REQUESTED,
                    &fresh,
                    &step_name,
                    correlation_id,
                ),
            ),
            StepEvent::Cancel => (
                names::STEP_CANCELLED,
                step_event_payload(names::STEP_CANCELLED, &fresh, &step_name, correlation_id),
            ),
            StepEvent::ResolveManually => (
                names::STEP_RESOLVED_MANUALLY,
                step_event_payload(
                    names::STEP_RESOLVED_MANUALLY,
                    &fresh,
                    &step_name,
                    correlation_id,
                ),
            ),
        };

        if let Err(e) = self.context.event_publisher().publish(event_name, payload) {
            warn!(
                step_uuid = %self.step.workflow_step_uuid,
                event = event_name,
                error = %e,
                "Failed to publish step transition event"
            );
        }
    }
}
