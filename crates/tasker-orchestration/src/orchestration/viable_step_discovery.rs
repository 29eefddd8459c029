//! # Viable Step Discovery
//!
//! Given a task, the set of steps eligible to run right now and the
//! processing mode for the batch. Tie-breaking inside the ready set is by
//! step uuid ascending so replays are reproducible.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use tasker_shared::events::names;
use tasker_shared::events::payloads::orchestration_payload;
use tasker_shared::models::orchestration::workflow_summary::dependency_levels_for_task;
use tasker_shared::models::orchestration::{
    ExecutionStatus, StepReadiness, TaskExecutionContext, TaskWorkflowSummary,
};
use tasker_shared::models::Task;
use tasker_shared::{SystemContext, TaskerResult};

/// How a discovered batch should be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Concurrent,
    Sequential,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingMode::Concurrent => f.write_str("concurrent"),
            ProcessingMode::Sequential => f.write_str("sequential"),
        }
    }
}

/// The outcome of one discovery pass
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub task_uuid: Uuid,
    /// Ready step ids, ordered by uuid ascending
    pub step_uuids: Vec<Uuid>,
    pub processing_mode: ProcessingMode,
}

impl DiscoveryResult {
    pub fn is_empty(&self) -> bool {
        self.step_uuids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ViableStepDiscovery {
    context: Arc<SystemContext>,
}

impl ViableStepDiscovery {
    pub fn new(context: Arc<SystemContext>) -> Self {
        Self { context }
    }

    /// Readiness entries for the steps that may execute now, ordered by uuid
    pub async fn find_viable_steps(&self, task_uuid: Uuid) -> TaskerResult<Vec<StepReadiness>> {
        let mut ready: Vec<StepReadiness> =
            StepReadiness::for_task(self.context.database_pool(), task_uuid, self.context.backoff())
                .await?
                .into_iter()
                .filter(|r| r.ready_for_execution)
                .collect();
        ready.sort_by_key(|r| r.workflow_step_uuid);
        Ok(ready)
    }

    /// The full discovery pass: execution-context shortcut, ready set, and
    /// processing-mode selection, with the discovery events published.
    #[instrument(skip(self, task), fields(task_uuid = %task.task_uuid))]
    pub async fn discover(&self, task: &Task) -> TaskerResult<DiscoveryResult> {
        let context = TaskExecutionContext::for_task(
            self.context.database_pool(),
            task.task_uuid,
            self.context.backoff(),
        )
        .await?;

        let Some(context) = context else {
            warn!(task_uuid = %task.task_uuid, "No execution context; task missing");
            return Ok(self.no_viable_steps(task, "task not found"));
        };

        if matches!(
            context.execution_status,
            ExecutionStatus::AllComplete | ExecutionStatus::BlockedByFailures
        ) {
            let reason = format!("execution status is {}", context.execution_status);
            return Ok(self.no_viable_steps(task, &reason));
        }

        let ready = self.find_viable_steps(task.task_uuid).await?;
        let step_uuids: Vec<Uuid> = ready.iter().map(|r| r.workflow_step_uuid).collect();

        let processing_mode = if task.sequential || step_uuids.len() == 1 {
            ProcessingMode::Sequential
        } else {
            ProcessingMode::Concurrent
        };

        debug!(
            task_uuid = %task.task_uuid,
            step_count = step_uuids.len(),
            processing_mode = %processing_mode,
            "Viable steps discovered"
        );

        self.publish(
            names::WORKFLOW_VIABLE_STEPS_DISCOVERED,
            task,
            json!({
                "task_id": task.task_uuid,
                "step_ids": step_uuids,
                "processing_mode": processing_mode,
                "step_count": step_uuids.len(),
            }),
        );

        Ok(DiscoveryResult {
            task_uuid: task.task_uuid,
            step_uuids,
            processing_mode,
        })
    }

    /// Load the execution context for a task
    pub async fn get_execution_context(
        &self,
        task_uuid: Uuid,
    ) -> TaskerResult<Option<TaskExecutionContext>> {
        TaskExecutionContext::for_task(
            self.context.database_pool(),
            task_uuid,
            self.context.backoff(),
        )
        .await
    }

    /// Load the workflow summary for a task
    pub async fn get_workflow_summary(&self, task_uuid: Uuid) -> TaskerResult<TaskWorkflowSummary> {
        TaskWorkflowSummary::for_task(
            self.context.database_pool(),
            task_uuid,
            self.context.backoff(),
        )
        .await
    }

    /// Topological depth of each step of a task
    pub async fn get_dependency_levels(&self, task_uuid: Uuid) -> TaskerResult<HashMap<Uuid, i32>> {
        let readiness =
            StepReadiness::for_task(self.context.database_pool(), task_uuid, self.context.backoff())
                .await?;
        let step_uuids: Vec<Uuid> = readiness.iter().map(|r| r.workflow_step_uuid).collect();
        dependency_levels_for_task(self.context.database_pool(), task_uuid, &step_uuids).await
    }

    fn no_viable_steps(&self, task: &Task, reason: &str) -> DiscoveryResult {
        debug!(task_uuid = %task.task_uuid, reason = reason, "No viable steps");
        self.publish(
            names::WORKFLOW_NO_VIABLE_STEPS,
            task,
            json!({
                "task_id": task.task_uuid,
                "reason": reason,
            }),
        );
        DiscoveryResult {
            task_uuid: task.task_uuid,
            step_uuids: Vec::new(),
            processing_mode: ProcessingMode::Sequential,
        }
    }

    fn publish(&self, event: &str, task: &Task, context: serde_json::Value) {
        let payload = orchestration_payload(event, Some(task.correlation_id), context);
        if let Err(e) = self.context.event_publisher().publish(event, payload) {
            warn!(event = event, error = %e, "Failed to publish discovery event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_mode_wire_format() {
        assert_eq!(
            serde_json::to_value(ProcessingMode::Concurrent).unwrap(),
            "concurrent"
        );
        assert_eq!(ProcessingMode::Sequential.to_string(), "sequential");
    }

    #[test]
    fn test_discovery_result_emptiness() {
        let result = DiscoveryResult {
            task_uuid: Uuid::now_v7(),
            step_uuids: vec![],
            processing_mode: ProcessingMode::Sequential,
        };
        assert!(result.is_empty());
    }
}
