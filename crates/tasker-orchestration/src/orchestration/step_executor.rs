//! # Step Executor
//!
//! Runs a batch of viable steps, concurrently under a small parallelism bound
//! or one at a time in the given order. Owns attempt bookkeeping, result and
//! failure persistence, and the state transitions around handler invocation.
//!
//! Every execution lands data first and transitions second, on both the
//! success and failure paths, so a crash between the two is recoverable by
//! replay: the next iteration observes a still-in-progress step.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use tasker_shared::events::names;
use tasker_shared::events::payloads::orchestration_payload;
use tasker_shared::models::core::workflow_step::WorkflowStep;
use tasker_shared::registry::TaskTemplateRegistry;
use tasker_shared::state_machine::{StepEvent, StepStateMachine, TaskState};
use tasker_shared::models::Task;
use tasker_shared::{SystemContext, TaskerError, TaskerResult};

use super::handlers::{StepExecutionScope, StepHandlerError, StepHandlerRegistry};
use super::viable_step_discovery::ProcessingMode;

/// Terminal-for-this-iteration status of one step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepExecutionStatus {
    Completed,
    Failed,
    /// Guard failure, cancellation, or missing row; nothing was executed
    Skipped,
}

#[derive(Debug, Clone)]
pub struct StepExecutionOutcome {
    pub workflow_step_uuid: Uuid,
    pub status: StepExecutionStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StepExecutor {
    context: Arc<SystemContext>,
    handler_registry: Arc<StepHandlerRegistry>,
    template_registry: Arc<TaskTemplateRegistry>,
}

impl StepExecutor {
    pub fn new(
        context: Arc<SystemContext>,
        handler_registry: Arc<StepHandlerRegistry>,
        template_registry: Arc<TaskTemplateRegistry>,
    ) -> Self {
        Self {
            context,
            handler_registry,
            template_registry,
        }
    }

    /// Execute a batch of steps. Concurrent mode bounds in-flight executions
    /// by `max_concurrent_steps`; sequential mode preserves the given order.
    #[instrument(skip(self, task, step_uuids), fields(task_uuid = %task.task_uuid, step_count = step_uuids.len()))]
    pub async fn execute_batch(
        &self,
        task: &Task,
        step_uuids: &[Uuid],
        mode: ProcessingMode,
    ) -> TaskerResult<Vec<StepExecutionOutcome>> {
        let handlers_by_step = self.handler_names_for_task(task).await?;

        match mode {
            ProcessingMode::Sequential => {
                let mut outcomes = Vec::with_capacity(step_uuids.len());
                for step_uuid in step_uuids {
                    outcomes.push(
                        self.execute_single(task, *step_uuid, &handlers_by_step)
                            .await?,
                    );
                }
                Ok(outcomes)
            }
            ProcessingMode::Concurrent => {
                let max_concurrent = self.context.max_concurrent_steps().max(1);
                let outcomes: Vec<TaskerResult<StepExecutionOutcome>> =
                    stream::iter(step_uuids.iter().copied())
                        .map(|step_uuid| self.execute_single(task, step_uuid, &handlers_by_step))
                        .buffer_unordered(max_concurrent)
                        .collect()
                        .await;
                outcomes.into_iter().collect()
            }
        }
    }

    /// One step through the per-step protocol. Handler errors become Failed
    /// outcomes; guard failures become Skipped; only infrastructure errors
    /// propagate.
    async fn execute_single(
        &self,
        task: &Task,
        workflow_step_uuid: Uuid,
        handlers_by_step: &HashMap<String, String>,
    ) -> TaskerResult<StepExecutionOutcome> {
        let pool = self.context.database_pool();

        // A cancel request on the task wins before the step starts;
        // in-flight attempts are left to finish their current attempt.
        if self.task_is_cancelled(task).await? {
            return self.cancel_pending_step(workflow_step_uuid).await;
        }

        let Some(step) = WorkflowStep::find_by_id(pool, workflow_step_uuid).await? else {
            warn!(step_uuid = %workflow_step_uuid, "Step disappeared before execution");
            return Ok(StepExecutionOutcome {
                workflow_step_uuid,
                status: StepExecutionStatus::Skipped,
                error: Some("step not found".to_string()),
            });
        };

        let mut machine = StepStateMachine::new(step.clone(), self.context.clone())
            .with_triggered_by("step_executor");

        // Guarded by readiness plus the most_recent row lock: of two workers
        // observing the same ready set, exactly one gets past this line.
        match machine.transition(StepEvent::Start).await {
            Ok(_) => {}
            Err(e) if e.is_guard_failure() || matches!(e, TaskerError::InvalidTransition { .. }) => {
                debug!(
                    step_uuid = %workflow_step_uuid,
                    error = %e,
                    "Step start guard failed; skipping"
                );
                self.publish_orchestration(
                    names::WORKFLOW_NO_VIABLE_STEPS,
                    task,
                    json!({
                        "task_id": task.task_uuid,
                        "step_id": workflow_step_uuid,
                        "reason": e.to_string(),
                    }),
                );
                return Ok(StepExecutionOutcome {
                    workflow_step_uuid,
                    status: StepExecutionStatus::Skipped,
                    error: Some(e.to_string()),
                });
            }
            Err(e) => return Err(e),
        }

        let step = WorkflowStep::begin_attempt(pool, workflow_step_uuid).await?;
        let step_name = self.step_name(workflow_step_uuid).await?;

        let scope = StepExecutionScope {
            task_uuid: task.task_uuid,
            workflow_step_uuid,
            step_name: step_name.clone(),
            task_context: task.context.clone().unwrap_or(Value::Null),
            step_inputs: step.inputs.clone().unwrap_or(Value::Null),
            previous_results: self.hydrate_previous_results(workflow_step_uuid).await?,
        };

        let handler_name = handlers_by_step.get(&step_name).ok_or_else(|| {
            TaskerError::ConfigurationError(format!(
                "no handler mapping for step '{step_name}' in task template"
            ))
        })?;
        let handler = self.handler_registry.resolve(handler_name)?;

        debug!(
            step_uuid = %workflow_step_uuid,
            step_name = %step_name,
            handler = %handler_name,
            attempt = step.attempts,
            "Invoking step handler"
        );

        match handler.call(scope).await {
            Ok(results) => {
                // Save first, then transition
                WorkflowStep::mark_processed(pool, workflow_step_uuid, Some(results.clone()))
                    .await?;
                machine.transition(StepEvent::Complete(Some(results))).await?;
                Ok(StepExecutionOutcome {
                    workflow_step_uuid,
                    status: StepExecutionStatus::Completed,
                    error: None,
                })
            }
            Err(handler_error) => {
                self.record_step_failure(&mut machine, workflow_step_uuid, &step, handler_error)
                    .await
            }
        }
    }

    /// Persist failure data, then transition to failed. Permanent failures
    /// drop the retryable flag so the readiness projection never reschedules
    /// them.
    async fn record_step_failure(
        &self,
        machine: &mut StepStateMachine,
        workflow_step_uuid: Uuid,
        step: &WorkflowStep,
        handler_error: StepHandlerError,
    ) -> TaskerResult<StepExecutionOutcome> {
        let pool = self.context.database_pool();
        let message = handler_error.message().to_string();

        let mut error_results = json!({
            "error": message,
            "error_class": handler_error.error_class(),
            "backtrace": Value::Null,
        });
        if let StepHandlerError::Permanent {
            error_code: Some(code),
            ..
        } = &handler_error
        {
            error_results["error_code"] = json!(code);
        }
        match &handler_error {
            StepHandlerError::Retryable {
                context: Some(context),
                ..
            }
            | StepHandlerError::Permanent {
                context: Some(context),
                ..
            } => error_results["context"] = context.clone(),
            _ => {}
        }

        let retryable = !handler_error.is_permanent();
        WorkflowStep::record_failure(
            pool,
            workflow_step_uuid,
            error_results,
            handler_error.retry_after_seconds(),
            retryable,
        )
        .await?;
        machine.transition(StepEvent::Fail(message.clone())).await?;

        let terminal = handler_error.is_permanent() || step.attempts + 1 >= step.retry_limit;
        debug!(
            step_uuid = %workflow_step_uuid,
            attempt = step.attempts + 1,
            retry_limit = step.retry_limit,
            permanent = handler_error.is_permanent(),
            terminal = terminal,
            "Step failed"
        );

        Ok(StepExecutionOutcome {
            workflow_step_uuid,
            status: StepExecutionStatus::Failed,
            error: Some(message),
        })
    }

    /// Results of completed predecessors, keyed by step name
    async fn hydrate_previous_results(
        &self,
        workflow_step_uuid: Uuid,
    ) -> TaskerResult<HashMap<String, Value>> {
        let rows: Vec<(String, Option<Value>)> = sqlx::query_as(
            "SELECT ns.name, ws.results \
             FROM workflow_step_edges e \
             JOIN workflow_steps ws ON ws.workflow_step_uuid = e.from_step_uuid \
             JOIN named_steps ns ON ns.named_step_uuid = ws.named_step_uuid \
             WHERE e.to_step_uuid = $1 AND ws.processed",
        )
        .bind(workflow_step_uuid)
        .fetch_all(self.context.database_pool())
        .await
        .map_err(|e| TaskerError::database("hydrate_previous_results", e))?;

        Ok(rows
            .into_iter()
            .map(|(name, results)| (name, results.unwrap_or(Value::Null)))
            .collect())
    }

    /// Map step name -> handler name from the task's template
    async fn handler_names_for_task(&self, task: &Task) -> TaskerResult<HashMap<String, String>> {
        let pool = self.context.database_pool();
        let coordinates: Option<(String, String, String)> = sqlx::query_as(
            "SELECT ns.name, nt.name, nt.version \
             FROM named_tasks nt \
             JOIN task_namespaces ns ON ns.task_namespace_uuid = nt.task_namespace_uuid \
             WHERE nt.named_task_uuid = $1",
        )
        .bind(task.named_task_uuid)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("task_template_coordinates", e))?;

        let Some((namespace, name, version)) = coordinates else {
            return Err(TaskerError::ConfigurationError(format!(
                "task {} references a missing named task",
                task.task_uuid
            )));
        };

        let template = self
            .template_registry
            .get_task_template(&namespace, &name, &version)?;
        Ok(template
            .steps
            .iter()
            .map(|s| (s.name.clone(), s.handler.clone()))
            .collect())
    }

    async fn step_name(&self, workflow_step_uuid: Uuid) -> TaskerResult<String> {
        let name: Option<(String,)> = sqlx::query_as(
            "SELECT ns.name FROM workflow_steps ws \
             JOIN named_steps ns ON ns.named_step_uuid = ws.named_step_uuid \
             WHERE ws.workflow_step_uuid = $1",
        )
        .bind(workflow_step_uuid)
        .fetch_optional(self.context.database_pool())
        .await
        .map_err(|e| TaskerError::database("step_name", e))?;
        Ok(name.map(|(n,)| n).unwrap_or_default())
    }

    async fn task_is_cancelled(&self, task: &Task) -> TaskerResult<bool> {
        let state = task.get_current_state(self.context.database_pool()).await?;
        Ok(state
            .as_deref()
            .map(|s| TaskState::from_str(s) == Ok(TaskState::Cancelled))
            .unwrap_or(false))
    }

    /// Transition a pending step to cancelled on behalf of a cancelled task
    async fn cancel_pending_step(
        &self,
        workflow_step_uuid: Uuid,
    ) -> TaskerResult<StepExecutionOutcome> {
        let pool = self.context.database_pool();
        if let Some(step) = WorkflowStep::find_by_id(pool, workflow_step_uuid).await? {
            let mut machine = StepStateMachine::new(step, self.context.clone())
                .with_triggered_by("step_executor");
            if let Err(e) = machine.transition(StepEvent::Cancel).await {
                debug!(
                    step_uuid = %workflow_step_uuid,
                    error = %e,
                    "Step not cancellable; leaving as-is"
                );
            }
        }
        Ok(StepExecutionOutcome {
            workflow_step_uuid,
            status: StepExecutionStatus::Skipped,
            error: Some("task cancelled".to_string()),
        })
    }

    fn publish_orchestration(&self, event: &str, task: &Task, context: Value) {
        let payload = orchestration_payload(event, Some(task.correlation_id), context);
        if let Err(e) = self.context.event_publisher().publish(event, payload) {
            warn!(event = event, error = %e, "Failed to publish executor event");
        }
    }
}
