//! # Task Execution Context
//!
//! Per-task aggregate over step readiness: counts, execution status,
//! recommended action, completion percentage, and health. The classification
//! tables here are the single source of truth for what the finalizer and
//! orchestrator decide.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

use crate::errors::TaskerResult;
use crate::state_machine::states::WorkflowStepState;

use super::backoff::BackoffCalculator;
use super::step_readiness::StepReadiness;

/// Where a task's workflow stands right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    HasReadySteps,
    Processing,
    BlockedByFailures,
    AllComplete,
    WaitingForDependencies,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::HasReadySteps => "has_ready_steps",
            ExecutionStatus::Processing => "processing",
            ExecutionStatus::BlockedByFailures => "blocked_by_failures",
            ExecutionStatus::AllComplete => "all_complete",
            ExecutionStatus::WaitingForDependencies => "waiting_for_dependencies",
        };
        f.write_str(s)
    }
}

/// What the orchestrator should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    ExecuteReadySteps,
    WaitForCompletion,
    HandleFailures,
    FinalizeTask,
    WaitForDependencies,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecommendedAction::ExecuteReadySteps => "execute_ready_steps",
            RecommendedAction::WaitForCompletion => "wait_for_completion",
            RecommendedAction::HandleFailures => "handle_failures",
            RecommendedAction::FinalizeTask => "finalize_task",
            RecommendedAction::WaitForDependencies => "wait_for_dependencies",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Recovering,
    Blocked,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Recovering => "recovering",
            HealthStatus::Blocked => "blocked",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Step counts and derived decision data for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionContext {
    pub task_uuid: Uuid,
    pub total_steps: u32,
    pub pending_steps: u32,
    pub in_progress_steps: u32,
    pub completed_steps: u32,
    pub failed_steps: u32,
    pub ready_steps: u32,
    pub execution_status: ExecutionStatus,
    pub recommended_action: RecommendedAction,
    pub completion_percentage: f64,
    pub health_status: HealthStatus,
}

impl TaskExecutionContext {
    /// Aggregate a readiness set into decision data. Pure.
    pub fn from_readiness(task_uuid: Uuid, readiness: &[StepReadiness]) -> TaskExecutionContext {
        let total_steps = readiness.len() as u32;
        let mut pending_steps = 0;
        let mut in_progress_steps = 0;
        let mut completed_steps = 0;
        let mut failed_steps = 0;
        let mut blocked_failed_steps = 0;
        let mut ready_steps = 0;

        for step in readiness {
            match step.current_state {
                WorkflowStepState::Pending => pending_steps += 1,
                WorkflowStepState::InProgress => in_progress_steps += 1,
                WorkflowStepState::Complete | WorkflowStepState::ResolvedManually => {
                    completed_steps += 1
                }
                WorkflowStepState::Failed => failed_steps += 1,
                WorkflowStepState::Cancelled => {}
            }
            if step.terminally_failed() {
                blocked_failed_steps += 1;
            }
            if step.ready_for_execution {
                ready_steps += 1;
            }
        }

        let execution_status = classify_execution_status(
            ready_steps,
            in_progress_steps,
            blocked_failed_steps,
            completed_steps,
            total_steps,
        );
        let recommended_action = recommended_action_for(execution_status);
        let health_status = classify_health(failed_steps, ready_steps);
        let completion_percentage = if total_steps == 0 {
            0.0
        } else {
            100.0 * f64::from(completed_steps) / f64::from(total_steps)
        };

        TaskExecutionContext {
            task_uuid,
            total_steps,
            pending_steps,
            in_progress_steps,
            completed_steps,
            failed_steps,
            ready_steps,
            execution_status,
            recommended_action,
            completion_percentage,
            health_status,
        }
    }

    /// Load the context for a task. `None` when the task does not exist.
    pub async fn for_task(
        pool: &PgPool,
        task_uuid: Uuid,
        backoff: &BackoffCalculator,
    ) -> TaskerResult<Option<TaskExecutionContext>> {
        let task_exists: (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM tasks WHERE task_uuid = $1)")
                .bind(task_uuid)
                .fetch_one(pool)
                .await?;
        if !task_exists.0 {
            return Ok(None);
        }

        let readiness = StepReadiness::for_task(pool, task_uuid, backoff).await?;
        Ok(Some(Self::from_readiness(task_uuid, &readiness)))
    }
}

/// The five-state execution status rule table, evaluated in order.
///
/// `blocked_failed_steps` counts only terminally failed steps (permanent or
/// retry-exhausted): a failed step waiting out its backoff window does not
/// block the task, it classifies as waiting so the finalizer re-enqueues
/// with a delay instead of erroring the task.
pub fn classify_execution_status(
    ready_steps: u32,
    in_progress_steps: u32,
    blocked_failed_steps: u32,
    completed_steps: u32,
    total_steps: u32,
) -> ExecutionStatus {
    if ready_steps > 0 {
        ExecutionStatus::HasReadySteps
    } else if in_progress_steps > 0 {
        ExecutionStatus::Processing
    } else if blocked_failed_steps > 0 {
        ExecutionStatus::BlockedByFailures
    } else if completed_steps == total_steps {
        ExecutionStatus::AllComplete
    } else {
        ExecutionStatus::WaitingForDependencies
    }
}

/// Recommended action mirrors the execution-status ordering
pub fn recommended_action_for(status: ExecutionStatus) -> RecommendedAction {
    match status {
        ExecutionStatus::HasReadySteps => RecommendedAction::ExecuteReadySteps,
        ExecutionStatus::Processing => RecommendedAction::WaitForCompletion,
        ExecutionStatus::BlockedByFailures => RecommendedAction::HandleFailures,
        ExecutionStatus::AllComplete => RecommendedAction::FinalizeTask,
        ExecutionStatus::WaitingForDependencies => RecommendedAction::WaitForDependencies,
    }
}

pub fn classify_health(failed_steps: u32, ready_steps: u32) -> HealthStatus {
    match (failed_steps, ready_steps) {
        (0, _) => HealthStatus::Healthy,
        (_, r) if r > 0 => HealthStatus::Recovering,
        (_, 0) => HealthStatus::Blocked,
        // Unreachable with unsigned counts; kept so the classification is total
        #[allow(unreachable_patterns)]
        _ => HealthStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::orchestration::step_readiness::{StepReadiness, StepReadinessInput};

    fn readiness(state: WorkflowStepState, ready: bool) -> StepReadiness {
        let input = StepReadinessInput {
            workflow_step_uuid: Uuid::now_v7(),
            task_uuid: Uuid::now_v7(),
            named_step: "unit".to_string(),
            current_state: state,
            parent_states: Vec::new(),
            attempts: 0,
            retry_limit: 3,
            retryable: true,
            backoff_request_seconds: None,
            last_attempted_at: None,
            last_failure_at: None,
        };
        let mut evaluated = StepReadiness::evaluate(
            &input,
            &BackoffCalculator::default(),
            chrono::Utc::now().naive_utc(),
        );
        evaluated.ready_for_execution = ready;
        evaluated
    }

    #[test]
    fn test_status_ordering_ready_wins() {
        // Ready steps beat in-progress and failed in the rule table
        assert_eq!(
            classify_execution_status(1, 2, 3, 0, 6),
            ExecutionStatus::HasReadySteps
        );
        assert_eq!(
            classify_execution_status(0, 2, 3, 0, 5),
            ExecutionStatus::Processing
        );
        assert_eq!(
            classify_execution_status(0, 0, 3, 0, 3),
            ExecutionStatus::BlockedByFailures
        );
        assert_eq!(
            classify_execution_status(0, 0, 0, 4, 4),
            ExecutionStatus::AllComplete
        );
        assert_eq!(
            classify_execution_status(0, 0, 0, 2, 4),
            ExecutionStatus::WaitingForDependencies
        );
    }

    #[test]
    fn test_empty_task_is_all_complete() {
        let context = TaskExecutionContext::from_readiness(Uuid::now_v7(), &[]);
        assert_eq!(context.execution_status, ExecutionStatus::AllComplete);
        assert_eq!(context.recommended_action, RecommendedAction::FinalizeTask);
        assert_eq!(context.completion_percentage, 0.0);
        assert_eq!(context.health_status, HealthStatus::Healthy);
    }

    #[test]
    fn test_classification_is_total() {
        // Every count tuple maps to exactly one status
        for ready in 0..3u32 {
            for in_progress in 0..3u32 {
                for failed in 0..3u32 {
                    for completed in 0..3u32 {
                        let total = ready + in_progress + failed + completed;
                        let _ = classify_execution_status(
                            ready,
                            in_progress,
                            failed,
                            completed,
                            total,
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_completion_percentage_bounds() {
        let complete = readiness(WorkflowStepState::Complete, false);
        let pending = readiness(WorkflowStepState::Pending, true);

        let context = TaskExecutionContext::from_readiness(
            Uuid::now_v7(),
            &[complete.clone(), pending],
        );
        assert!((0.0..=100.0).contains(&context.completion_percentage));
        assert_eq!(context.completion_percentage, 50.0);

        let context =
            TaskExecutionContext::from_readiness(Uuid::now_v7(), &[complete.clone(), complete]);
        assert_eq!(context.completion_percentage, 100.0);
        assert_eq!(context.execution_status, ExecutionStatus::AllComplete);
    }

    #[test]
    fn test_health_classification() {
        assert_eq!(classify_health(0, 0), HealthStatus::Healthy);
        assert_eq!(classify_health(0, 5), HealthStatus::Healthy);
        assert_eq!(classify_health(2, 1), HealthStatus::Recovering);
        assert_eq!(classify_health(2, 0), HealthStatus::Blocked);
    }

    #[test]
    fn test_failed_but_retryable_step_keeps_task_unblocked() {
        // A failed step that is ready again counts as both failed and ready;
        // has_ready_steps wins and health is recovering
        let failed_ready = readiness(WorkflowStepState::Failed, true);
        let context = TaskExecutionContext::from_readiness(Uuid::now_v7(), &[failed_ready]);
        assert_eq!(context.execution_status, ExecutionStatus::HasReadySteps);
        assert_eq!(context.health_status, HealthStatus::Recovering);
    }

    #[test]
    fn test_failed_step_in_backoff_waits_instead_of_blocking() {
        // Failed, retryable, attempts remaining, but backoff window not yet
        // elapsed: the task waits, it is not blocked
        let mut waiting = readiness(WorkflowStepState::Failed, false);
        waiting.retryable = true;
        waiting.attempts = 1;
        let context = TaskExecutionContext::from_readiness(Uuid::now_v7(), &[waiting]);
        assert_eq!(
            context.execution_status,
            ExecutionStatus::WaitingForDependencies
        );
        assert_eq!(context.failed_steps, 1);
    }

    #[test]
    fn test_terminally_failed_step_blocks_task() {
        let mut exhausted = readiness(WorkflowStepState::Failed, false);
        exhausted.retryable = true;
        exhausted.attempts = 3;
        exhausted.retry_limit = 3;
        let context = TaskExecutionContext::from_readiness(Uuid::now_v7(), &[exhausted]);
        assert_eq!(
            context.execution_status,
            ExecutionStatus::BlockedByFailures
        );

        let mut permanent = readiness(WorkflowStepState::Failed, false);
        permanent.retryable = false;
        permanent.attempts = 1;
        let context = TaskExecutionContext::from_readiness(Uuid::now_v7(), &[permanent]);
        assert_eq!(
            context.execution_status,
            ExecutionStatus::BlockedByFailures
        );
    }

    #[test]
    fn test_cancelled_steps_count_toward_total_only() {
        let cancelled = readiness(WorkflowStepState::Cancelled, false);
        let complete = readiness(WorkflowStepState::Complete, false);
        let context =
            TaskExecutionContext::from_readiness(Uuid::now_v7(), &[cancelled, complete]);
        assert_eq!(context.total_steps, 2);
        assert_eq!(context.completed_steps, 1);
        // completed != total, nothing ready or running or failed
        assert_eq!(
            context.execution_status,
            ExecutionStatus::WaitingForDependencies
        );
    }

    #[test]
    fn test_serde_wire_format_is_snake_case() {
        let status = serde_json::to_value(ExecutionStatus::BlockedByFailures).unwrap();
        assert_eq!(status, "blocked_by_failures");
        let action = serde_json::to_value(RecommendedAction::ExecuteReadySteps).unwrap();
        assert_eq!(action, "execute_ready_steps");
    }
}
