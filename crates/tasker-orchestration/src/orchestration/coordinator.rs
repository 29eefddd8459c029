//! # Workflow Coordinator
//!
//! Drives iterations of a single task: read the execution context, dispatch
//! on the recommended action, and loop until the task completes, fails, or
//! defers back to the run queue. The loop is single-threaded per task; many
//! tasks are driven in parallel by distinct workers, and the step state
//! machine's guard makes concurrent invocations on the same task safe.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use tasker_shared::events::names;
use tasker_shared::events::payloads::orchestration_payload;
use tasker_shared::models::orchestration::{RecommendedAction, TaskExecutionContext};
use tasker_shared::models::Task;
use tasker_shared::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use tasker_shared::{SystemContext, TaskerError, TaskerResult};

use super::step_executor::StepExecutor;
use super::task_finalizer::{FinalizationAction, FinalizationResult, TaskFinalizer};
use super::viable_step_discovery::ViableStepDiscovery;

/// Safety valve against pathological loops; a healthy task defers to the run
/// queue long before this
const MAX_ITERATIONS: u32 = 100;

#[derive(Debug, Clone)]
pub struct WorkflowCoordinator {
    context: Arc<SystemContext>,
    discovery: ViableStepDiscovery,
    executor: StepExecutor,
    finalizer: TaskFinalizer,
}

impl WorkflowCoordinator {
    pub fn new(
        context: Arc<SystemContext>,
        discovery: ViableStepDiscovery,
        executor: StepExecutor,
        finalizer: TaskFinalizer,
    ) -> Self {
        Self {
            context,
            discovery,
            executor,
            finalizer,
        }
    }

    /// Run orchestration iterations for one task until a terminating action
    #[instrument(skip(self), fields(task_uuid = %task_uuid))]
    pub async fn run_task(&self, task_uuid: Uuid) -> TaskerResult<FinalizationResult> {
        let pool = self.context.database_pool();
        let task = Task::find_by_id(pool, task_uuid)
            .await?
            .ok_or_else(|| {
                TaskerError::OrchestrationError(format!("task {task_uuid} not found"))
            })?;

        if self.task_is_terminal(&task).await? {
            debug!(task_uuid = %task_uuid, "Task already terminal; nothing to run");
            return Ok(FinalizationResult {
                task_uuid,
                action: FinalizationAction::NoAction,
                completion_percentage: None,
                total_steps: None,
                health_status: None,
                reason: Some("task already terminal".to_string()),
            });
        }

        for iteration in 1..=MAX_ITERATIONS {
            let execution_context = TaskExecutionContext::for_task(
                pool,
                task.task_uuid,
                self.context.backoff(),
            )
            .await?
            .ok_or_else(|| {
                TaskerError::OrchestrationError(format!(
                    "task {task_uuid} lost its execution context mid-run"
                ))
            })?;

            self.publish_iteration_started(&task, iteration, &execution_context);

            match execution_context.recommended_action {
                RecommendedAction::ExecuteReadySteps => {
                    self.start_task_if_pending(&task).await?;
                    let discovered = self.discovery.discover(&task).await?;
                    if discovered.is_empty() {
                        // Transient inconsistency between context and ready
                        // set; let the finalizer settle it
                        break;
                    }
                    self.executor
                        .execute_batch(&task, &discovered.step_uuids, discovered.processing_mode)
                        .await?;
                }
                RecommendedAction::WaitForCompletion
                | RecommendedAction::WaitForDependencies
                | RecommendedAction::HandleFailures
                | RecommendedAction::FinalizeTask => {
                    return self.finalizer.finalize(task).await;
                }
            }
        }

        warn!(task_uuid = %task_uuid, "Iteration limit reached; deferring to finalizer");
        self.finalizer.finalize(task).await
    }

    /// The first iteration with ready work moves the task into in_progress
    async fn start_task_if_pending(&self, task: &Task) -> TaskerResult<()> {
        let mut machine = TaskStateMachine::new(task.clone(), self.context.clone())
            .with_triggered_by("workflow_coordinator");
        if machine.current_state().await? == Some(TaskState::Pending) {
            machine.transition(TaskEvent::Start).await?;
        }
        Ok(())
    }

    async fn task_is_terminal(&self, task: &Task) -> TaskerResult<bool> {
        let state = task.get_current_state(self.context.database_pool()).await?;
        Ok(state
            .as_deref()
            .and_then(|s| TaskState::from_str(s).ok())
            .map(|s| s.is_terminal())
            .unwrap_or(false))
    }

    fn publish_iteration_started(
        &self,
        task: &Task,
        iteration: u32,
        execution_context: &TaskExecutionContext,
    ) {
        let payload = orchestration_payload(
            names::WORKFLOW_ITERATION_STARTED,
            Some(task.correlation_id),
            json!({
                "task_id": task.task_uuid,
                "iteration": iteration,
                "execution_status": execution_context.execution_status,
                "recommended_action": execution_context.recommended_action,
                "ready_steps": execution_context.ready_steps,
                "in_progress_steps": execution_context.in_progress_steps,
                "completed_steps": execution_context.completed_steps,
                "failed_steps": execution_context.failed_steps,
            }),
        );
        if let Err(e) = self
            .context
            .event_publisher()
            .publish(names::WORKFLOW_ITERATION_STARTED, payload)
        {
            warn!(error = %e, "Failed to publish iteration event");
        }
    }
}
