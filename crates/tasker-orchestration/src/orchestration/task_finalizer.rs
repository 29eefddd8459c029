//! # Task Finalizer
//!
//! The decision half of finalization. Reads the task execution context and
//! decides: complete, fail, or defer back to the run queue with the delay
//! class matching the status. The finalizer never retries steps or mutates
//! step state; it only settles the task's fate.

use std::sync::Arc;

use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use tasker_shared::models::orchestration::{
    ExecutionStatus, HealthStatus, StepReadiness, TaskExecutionContext,
};
use tasker_shared::models::Task;
use tasker_shared::state_machine::{TaskEvent, TaskState, TaskStateMachine, WorkflowStepState};
use tasker_shared::{SystemContext, TaskerError, TaskerResult};

use super::task_reenqueuer::TaskReenqueuer;

/// What the finalizer did with the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizationAction {
    Completed,
    Failed,
    Reenqueued,
    NoAction,
}

#[derive(Debug, Clone)]
pub struct FinalizationResult {
    pub task_uuid: Uuid,
    pub action: FinalizationAction,
    pub completion_percentage: Option<f64>,
    pub total_steps: Option<u32>,
    pub health_status: Option<HealthStatus>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskFinalizer {
    context: Arc<SystemContext>,
    reenqueuer: TaskReenqueuer,
}

impl TaskFinalizer {
    pub fn new(context: Arc<SystemContext>, reenqueuer: TaskReenqueuer) -> Self {
        Self {
            context,
            reenqueuer,
        }
    }

    /// Decide and perform the task's fate from its execution context
    #[instrument(skip(self, task), fields(task_uuid = %task.task_uuid))]
    pub async fn finalize(&self, task: Task) -> TaskerResult<FinalizationResult> {
        let execution_context = TaskExecutionContext::for_task(
            self.context.database_pool(),
            task.task_uuid,
            self.context.backoff(),
        )
        .await?;

        let Some(execution_context) = execution_context else {
            error!(task_uuid = %task.task_uuid, "No execution context for finalization");
            return Err(TaskerError::OrchestrationError(format!(
                "cannot finalize task {}: no execution context",
                task.task_uuid
            )));
        };

        debug!(
            task_uuid = %task.task_uuid,
            execution_status = %execution_context.execution_status,
            completed = execution_context.completed_steps,
            failed = execution_context.failed_steps,
            ready = execution_context.ready_steps,
            "Finalizing task"
        );

        match execution_context.execution_status {
            ExecutionStatus::AllComplete => self.complete_task(task, &execution_context).await,
            ExecutionStatus::BlockedByFailures => self.error_task(task, &execution_context).await,
            ExecutionStatus::HasReadySteps => {
                let delay = self.context.config().reenqueue.has_ready_steps_seconds;
                self.reenqueue_task(task, &execution_context, delay, "ready steps remain")
                    .await
            }
            ExecutionStatus::Processing => {
                let delay = self.context.config().reenqueue.processing_seconds;
                self.reenqueue_task(task, &execution_context, delay, "steps in progress")
                    .await
            }
            ExecutionStatus::WaitingForDependencies => {
                let delay = self
                    .context
                    .config()
                    .reenqueue
                    .waiting_for_dependencies_seconds;
                self.reenqueue_task(task, &execution_context, delay, "waiting for dependencies")
                    .await
            }
        }
    }

    /// Transition the task to complete; the machine publishes task.completed
    async fn complete_task(
        &self,
        task: Task,
        execution_context: &TaskExecutionContext,
    ) -> TaskerResult<FinalizationResult> {
        let task_uuid = task.task_uuid;
        // A settled task has no business staying in the run queue
        self.reenqueuer.cancel(&task).await?;

        let mut machine = TaskStateMachine::new(task, self.context.clone())
            .with_triggered_by("task_finalizer");

        // An empty or fast task may still be pending; bring it through
        // in_progress before completing.
        if machine.current_state().await? == Some(TaskState::Pending) {
            machine.transition(TaskEvent::Start).await?;
        }
        machine.transition(TaskEvent::Complete).await?;

        Ok(FinalizationResult {
            task_uuid,
            action: FinalizationAction::Completed,
            completion_percentage: Some(execution_context.completion_percentage),
            total_steps: Some(execution_context.total_steps),
            health_status: Some(execution_context.health_status),
            reason: Some("all steps complete".to_string()),
        })
    }

    /// Transition the task to error with a summary of terminally failed steps
    async fn error_task(
        &self,
        task: Task,
        execution_context: &TaskExecutionContext,
    ) -> TaskerResult<FinalizationResult> {
        let task_uuid = task.task_uuid;
        self.reenqueuer.cancel(&task).await?;
        let error_steps = self.failed_step_names(task_uuid).await.unwrap_or_default();

        let mut machine = TaskStateMachine::new(task, self.context.clone())
            .with_triggered_by("task_finalizer");
        if machine.current_state().await? == Some(TaskState::Pending) {
            machine.transition(TaskEvent::Start).await?;
        }
        machine
            .transition(TaskEvent::Fail(format!(
                "blocked by failed steps: [{}]",
                error_steps.join(", ")
            )))
            .await?;

        warn!(
            task_uuid = %task_uuid,
            error_steps = ?error_steps,
            "Task failed; blocked by step failures"
        );

        Ok(FinalizationResult {
            task_uuid,
            action: FinalizationAction::Failed,
            completion_percentage: Some(execution_context.completion_percentage),
            total_steps: Some(execution_context.total_steps),
            health_status: Some(execution_context.health_status),
            reason: Some(format!("error_steps: [{}]", error_steps.join(", "))),
        })
    }

    /// Defer the task back to the run queue via the reenqueuer
    async fn reenqueue_task(
        &self,
        task: Task,
        execution_context: &TaskExecutionContext,
        delay_seconds: i64,
        reason: &str,
    ) -> TaskerResult<FinalizationResult> {
        let task_uuid = task.task_uuid;
        self.reenqueuer.reenqueue(&task, delay_seconds).await?;

        Ok(FinalizationResult {
            task_uuid,
            action: FinalizationAction::Reenqueued,
            completion_percentage: Some(execution_context.completion_percentage),
            total_steps: Some(execution_context.total_steps),
            health_status: Some(execution_context.health_status),
            reason: Some(reason.to_string()),
        })
    }

    /// Names of steps currently in the failed state
    async fn failed_step_names(&self, task_uuid: Uuid) -> TaskerResult<Vec<String>> {
        let readiness = StepReadiness::for_task(
            self.context.database_pool(),
            task_uuid,
            self.context.backoff(),
        )
        .await?;
        Ok(readiness
            .into_iter()
            .filter(|r| r.current_state == WorkflowStepState::Failed)
            .map(|r| r.named_step)
            .collect())
    }
}
