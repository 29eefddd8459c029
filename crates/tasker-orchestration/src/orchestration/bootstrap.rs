//! # Orchestration Bootstrap
//!
//! Builds the orchestration system from a system context: registries,
//! discovery, executor, finalizer, reenqueuer, coordinator, and the metrics
//! subscriber. Everything downstream receives its dependencies explicitly;
//! nothing reaches for globals.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use tasker_shared::models::core::task_request::TaskRequest;
use tasker_shared::models::{Task, WorkflowStep};
use tasker_shared::registry::{TaskTemplate, TaskTemplateRegistry};
use tasker_shared::state_machine::{
    StepEvent, StepStateMachine, TaskEvent, TaskStateMachine, WorkflowStepState,
};
use tasker_shared::{SystemContext, TaskerError, TaskerResult};

use crate::metrics::{MetricsSubscriber, OrchestrationMetrics};

use super::coordinator::WorkflowCoordinator;
use super::handlers::{StepHandler, StepHandlerRegistry};
use super::step_executor::StepExecutor;
use super::task_finalizer::{FinalizationResult, TaskFinalizer};
use super::task_initializer::{TaskInitializationResult, TaskInitializer};
use super::task_reenqueuer::TaskReenqueuer;
use super::viable_step_discovery::ViableStepDiscovery;

#[derive(Debug)]
pub struct OrchestrationSystem {
    context: Arc<SystemContext>,
    template_registry: Arc<TaskTemplateRegistry>,
    handler_registry: Arc<StepHandlerRegistry>,
    initializer: TaskInitializer,
    discovery: ViableStepDiscovery,
    reenqueuer: TaskReenqueuer,
    coordinator: WorkflowCoordinator,
    metrics: Arc<OrchestrationMetrics>,
}

impl OrchestrationSystem {
    /// Compose the system over an existing context
    pub fn new(context: Arc<SystemContext>) -> TaskerResult<Arc<OrchestrationSystem>> {
        let template_registry = Arc::new(TaskTemplateRegistry::new(
            context.database_pool().clone(),
        ));
        let handler_registry = Arc::new(StepHandlerRegistry::new());

        let metrics = OrchestrationMetrics::new();
        context
            .event_publisher()
            .subscribe(MetricsSubscriber::new(metrics.clone()))?;

        let initializer = TaskInitializer::new(context.clone(), template_registry.clone());
        let discovery = ViableStepDiscovery::new(context.clone());
        let executor = StepExecutor::new(
            context.clone(),
            handler_registry.clone(),
            template_registry.clone(),
        );
        let reenqueuer = TaskReenqueuer::new(context.clone());
        let finalizer = TaskFinalizer::new(context.clone(), reenqueuer.clone());
        let coordinator = WorkflowCoordinator::new(
            context.clone(),
            discovery.clone(),
            executor,
            finalizer,
        );

        Ok(Arc::new(OrchestrationSystem {
            context,
            template_registry,
            handler_registry,
            initializer,
            discovery,
            reenqueuer,
            coordinator,
            metrics,
        }))
    }

    /// Load configuration, connect, migrate, and compose
    pub async fn bootstrap() -> TaskerResult<Arc<OrchestrationSystem>> {
        let context = Arc::new(SystemContext::bootstrap().await?);
        Self::new(context)
    }

    pub fn context(&self) -> &Arc<SystemContext> {
        &self.context
    }

    pub fn template_registry(&self) -> &Arc<TaskTemplateRegistry> {
        &self.template_registry
    }

    pub fn handler_registry(&self) -> &Arc<StepHandlerRegistry> {
        &self.handler_registry
    }

    pub fn metrics(&self) -> &Arc<OrchestrationMetrics> {
        &self.metrics
    }

    pub fn reenqueuer(&self) -> &TaskReenqueuer {
        &self.reenqueuer
    }

    pub fn discovery(&self) -> &ViableStepDiscovery {
        &self.discovery
    }

    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handler_registry.register(name, handler);
    }

    /// Register a template after verifying every step's handler exists.
    /// Handler existence is a registration-time check, never a first-event
    /// surprise.
    pub async fn register_template(&self, template: TaskTemplate) -> TaskerResult<()> {
        for step in &template.steps {
            if !self.handler_registry.contains(&step.handler) {
                return Err(TaskerError::ConfigurationError(format!(
                    "template {}/{} step '{}' names unregistered handler '{}'",
                    template.namespace, template.name, step.name, step.handler
                )));
            }
        }
        self.template_registry.register_template(template).await?;
        Ok(())
    }

    /// Create a task from a request and enqueue it for orchestration
    #[instrument(skip(self, request), fields(namespace = %request.namespace, name = %request.name))]
    pub async fn submit_task_request(
        &self,
        request: TaskRequest,
    ) -> TaskerResult<TaskInitializationResult> {
        let result = self.initializer.create_task_from_request(request).await?;
        let task = Task::find_by_id(self.context.database_pool(), result.task_uuid)
            .await?
            .ok_or_else(|| {
                TaskerError::OrchestrationError(format!(
                    "task {} vanished after initialization",
                    result.task_uuid
                ))
            })?;
        self.reenqueuer.reenqueue(&task, 0).await?;
        Ok(result)
    }

    /// Run orchestration iterations for one task now
    pub async fn run_task(&self, task_uuid: Uuid) -> TaskerResult<FinalizationResult> {
        self.coordinator.run_task(task_uuid).await
    }

    /// Claim due tasks from the run queue and drive each one. Returns how
    /// many tasks were claimed.
    pub async fn process_queue_batch(&self, limit: i64) -> TaskerResult<usize> {
        let task_uuids = self.reenqueuer.dequeue_ready(limit).await?;
        let claimed = task_uuids.len();
        for task_uuid in task_uuids {
            if let Err(e) = self.coordinator.run_task(task_uuid).await {
                // The task will be re-enqueued by supervisory policy; an
                // orchestration failure must not poison the batch
                error!(task_uuid = %task_uuid, error = %e, "Task orchestration failed");
            }
        }
        Ok(claimed)
    }

    /// Poll the run queue until shutdown is signalled
    pub async fn run_queue_worker(
        self: Arc<Self>,
        poll_interval: Duration,
        batch_size: i64,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            batch_size = batch_size,
            "Run-queue worker started"
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Run-queue worker stopping");
                        return;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {
                    match self.process_queue_batch(batch_size).await {
                        Ok(0) => {}
                        Ok(claimed) => debug!(claimed = claimed, "Processed queue batch"),
                        Err(e) => error!(error = %e, "Queue batch failed"),
                    }
                }
            }
        }
    }

    /// Cancel a task: transition it to cancelled, cancel its pending steps,
    /// and drop it from the run queue. In-flight step attempts are left to
    /// finish; they are skipped on the next iteration.
    pub async fn cancel_task(&self, task_uuid: Uuid) -> TaskerResult<bool> {
        let pool = self.context.database_pool();
        let Some(task) = Task::find_by_id(pool, task_uuid).await? else {
            return Ok(false);
        };

        let mut machine = TaskStateMachine::new(task.clone(), self.context.clone())
            .with_triggered_by("cancellation");
        machine.transition(TaskEvent::Cancel).await?;

        for step in WorkflowStep::list_by_task(pool, task_uuid).await? {
            let mut step_machine = StepStateMachine::new(step, self.context.clone())
                .with_triggered_by("cancellation");
            if step_machine.current_state().await? == WorkflowStepState::Pending {
                if let Err(e) = step_machine.transition(StepEvent::Cancel).await {
                    debug!(error = %e, "Pending step not cancellable; skipping");
                }
            }
        }

        self.reenqueuer.cancel(&task).await?;
        Ok(true)
    }

    /// Cancel a single workflow step
    pub async fn cancel_step(&self, workflow_step_uuid: Uuid) -> TaskerResult<bool> {
        let pool = self.context.database_pool();
        let Some(step) = WorkflowStep::find_by_id(pool, workflow_step_uuid).await? else {
            return Ok(false);
        };
        let mut machine = StepStateMachine::new(step, self.context.clone())
            .with_triggered_by("cancellation");
        machine.transition(StepEvent::Cancel).await?;
        Ok(true)
    }
}
