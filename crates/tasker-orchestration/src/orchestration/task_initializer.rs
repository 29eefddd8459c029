//! # Task Initializer
//!
//! Turns a validated task request into a persisted task: the task row, every
//! workflow step from the template, the dependency edges, and the initial
//! pending transitions. Emits `task.initialize_requested` once the task is
//! live.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use tasker_shared::models::core::task::{NewTask, Task};
use tasker_shared::models::core::task_request::TaskRequest;
use tasker_shared::models::core::workflow_step::{NewWorkflowStep, WorkflowStep};
use tasker_shared::models::core::workflow_step_edge::{WorkflowStepEdge, DEFAULT_EDGE_NAME};
use tasker_shared::models::core::workflow_step_transition::{
    NewWorkflowStepTransition, WorkflowStepTransition,
};
use tasker_shared::models::{NamedStep, NamedTask};
use tasker_shared::models::core::dependent_system::DependentSystem;
use tasker_shared::registry::TaskTemplateRegistry;
use tasker_shared::state_machine::{TaskEvent, TaskStateMachine, WorkflowStepState};
use tasker_shared::{SystemContext, TaskerError, TaskerResult};

/// What initialization produced
#[derive(Debug, Clone)]
pub struct TaskInitializationResult {
    pub task_uuid: Uuid,
    pub step_count: usize,
    /// Step name -> created step uuid
    pub step_mapping: HashMap<String, Uuid>,
}

#[derive(Debug, Clone)]
pub struct TaskInitializer {
    context: Arc<SystemContext>,
    template_registry: Arc<TaskTemplateRegistry>,
}

impl TaskInitializer {
    pub fn new(context: Arc<SystemContext>, template_registry: Arc<TaskTemplateRegistry>) -> Self {
        Self {
            context,
            template_registry,
        }
    }

    /// Validate, deduplicate, and materialize a task from a request
    #[instrument(skip(self, request), fields(namespace = %request.namespace, name = %request.name))]
    pub async fn create_task_from_request(
        &self,
        request: TaskRequest,
    ) -> TaskerResult<TaskInitializationResult> {
        request.validate_request()?;

        let template = self.template_registry.get_task_template(
            &request.namespace,
            &request.name,
            &request.version,
        )?;

        let pool = self.context.database_pool();
        let named_task =
            NamedTask::find_by_coordinates(pool, &request.namespace, &request.name, &request.version)
                .await?
                .ok_or_else(|| {
                    TaskerError::ConfigurationError(format!(
                        "template {}/{}/{} registered but named task row missing",
                        request.namespace, request.name, request.version
                    ))
                })?;

        let identity_hash = self.context.identity_strategy().identity_hash(&request);
        let correlation_id = request.correlation_id_or_mint();

        let task = Task::create(
            pool,
            NewTask {
                named_task_uuid: named_task.named_task_uuid,
                requested_at: request.requested_at,
                initiator: request.initiator.clone(),
                source_system: request.source_system.clone(),
                reason: request.reason.clone(),
                bypass_steps: None,
                tags: if request.tags.is_empty() {
                    None
                } else {
                    Some(serde_json::json!(request.tags))
                },
                context: Some(request.context.clone()),
                identity_hash,
                priority: request.priority.unwrap_or(template.default_priority),
                sequential: request.sequential_execution() || template.sequential,
                correlation_id,
            },
        )
        .await?;

        let step_mapping = self.materialize_steps(&task, &template).await?;

        // nil -> pending on the task publishes task.initialize_requested
        let mut machine = TaskStateMachine::new(task.clone(), self.context.clone())
            .with_triggered_by("task_initializer");
        machine.transition(TaskEvent::Initialize).await?;

        info!(
            task_uuid = %task.task_uuid,
            correlation_id = %correlation_id,
            step_count = step_mapping.len(),
            "Task initialized"
        );

        Ok(TaskInitializationResult {
            task_uuid: task.task_uuid,
            step_count: step_mapping.len(),
            step_mapping,
        })
    }

    /// Create the step rows, edges, and initial pending transitions
    async fn materialize_steps(
        &self,
        task: &Task,
        template: &tasker_shared::registry::TaskTemplate,
    ) -> TaskerResult<HashMap<String, Uuid>> {
        let pool = self.context.database_pool();
        let mut step_mapping = HashMap::with_capacity(template.steps.len());

        for step_template in &template.steps {
            let system =
                DependentSystem::find_or_create(pool, &step_template.dependent_system, None)
                    .await?;
            let named_step = NamedStep::find_or_create(
                pool,
                system.dependent_system_uuid,
                &step_template.name,
                step_template.description.as_deref(),
            )
            .await?;

            let step = WorkflowStep::create(
                pool,
                NewWorkflowStep {
                    task_uuid: task.task_uuid,
                    named_step_uuid: named_step.named_step_uuid,
                    retryable: step_template.retryable,
                    retry_limit: step_template.retry_limit,
                    skippable: step_template.skippable,
                    inputs: step_template.inputs.clone(),
                },
            )
            .await?;

            WorkflowStepTransition::create(
                pool,
                NewWorkflowStepTransition {
                    workflow_step_uuid: step.workflow_step_uuid,
                    to_state: WorkflowStepState::Pending.to_string(),
                    from_state: None,
                    metadata: Some(serde_json::json!({
                        "triggered_by": "task_initializer",
                        "correlation_id": task.correlation_id,
                    })),
                },
            )
            .await?;

            step_mapping.insert(step_template.name.clone(), step.workflow_step_uuid);
        }

        for step_template in &template.steps {
            let to_step = step_mapping[&step_template.name];
            for dependency in &step_template.depends_on {
                let from_step = *step_mapping.get(dependency).ok_or_else(|| {
                    TaskerError::ConfigurationError(format!(
                        "step '{}' depends on unmaterialized step '{dependency}'",
                        step_template.name
                    ))
                })?;
                WorkflowStepEdge::create(pool, from_step, to_step, DEFAULT_EDGE_NAME).await?;
            }
        }

        Ok(step_mapping)
    }
}
