//! # Step Readiness
//!
//! Per-step readiness: dependency satisfaction, retry eligibility, and the
//! combined ready-for-execution predicate. Computed in one pass over four
//! targeted queries per task; the pure computation is separated from loading
//! so the rules are testable without a database.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};
use crate::models::core::workflow_step::WorkflowStep;
use crate::models::core::workflow_step_edge::WorkflowStepEdge;
use crate::models::core::workflow_step_transition::WorkflowStepTransition;
use crate::state_machine::states::WorkflowStepState;

use super::backoff::{BackoffCalculator, BackoffInput};

/// Readiness of a single step at a point in time
#[derive(Debug, Clone)]
pub struct StepReadiness {
    pub workflow_step_uuid: Uuid,
    pub task_uuid: Uuid,
    pub named_step: String,
    pub current_state: WorkflowStepState,
    /// Parent counts are zero for root steps, never null
    pub total_parents: u32,
    pub completed_parents: u32,
    pub dependencies_satisfied: bool,
    pub retry_eligible: bool,
    pub ready_for_execution: bool,
    pub retryable: bool,
    pub attempts: i32,
    pub retry_limit: i32,
    /// Earliest instant a waiting step becomes eligible again
    pub next_retry_at: Option<NaiveDateTime>,
}

/// Raw per-step inputs for the readiness computation
#[derive(Debug, Clone)]
pub struct StepReadinessInput {
    pub workflow_step_uuid: Uuid,
    pub task_uuid: Uuid,
    pub named_step: String,
    pub current_state: WorkflowStepState,
    pub parent_states: Vec<WorkflowStepState>,
    pub attempts: i32,
    pub retry_limit: i32,
    pub retryable: bool,
    pub backoff_request_seconds: Option<i32>,
    pub last_attempted_at: Option<NaiveDateTime>,
    pub last_failure_at: Option<NaiveDateTime>,
}

impl StepReadiness {
    /// Evaluate readiness for one step. Pure: all inputs are explicit.
    pub fn evaluate(
        input: &StepReadinessInput,
        backoff: &BackoffCalculator,
        now: NaiveDateTime,
    ) -> StepReadiness {
        let total_parents = input.parent_states.len() as u32;
        let completed_parents = input
            .parent_states
            .iter()
            .filter(|s| s.satisfies_dependencies())
            .count() as u32;
        let dependencies_satisfied = total_parents == 0 || completed_parents == total_parents;

        let timing = BackoffInput {
            attempts: input.attempts,
            backoff_request_seconds: input.backoff_request_seconds,
            last_attempted_at: input.last_attempted_at,
            last_failure_at: input.last_failure_at,
        };

        let within_retry_limit = input.attempts < input.retry_limit;
        let backoff_satisfied = backoff.backoff_satisfied(&timing, now);
        let retry_eligible = within_retry_limit && backoff_satisfied;

        // A permanently failed step (retryable dropped) never becomes ready
        // again; a failed-but-retryable step waits out its backoff window.
        let state_allows_execution = match input.current_state {
            WorkflowStepState::Pending => true,
            WorkflowStepState::Failed => input.retryable,
            _ => false,
        };

        let ready_for_execution =
            state_allows_execution && dependencies_satisfied && retry_eligible;

        let next_retry_at = if ready_for_execution {
            None
        } else {
            backoff.next_eligible_at(&timing)
        };

        StepReadiness {
            workflow_step_uuid: input.workflow_step_uuid,
            task_uuid: input.task_uuid,
            named_step: input.named_step.clone(),
            current_state: input.current_state,
            total_parents,
            completed_parents,
            dependencies_satisfied,
            retry_eligible,
            ready_for_execution,
            retryable: input.retryable,
            attempts: input.attempts,
            retry_limit: input.retry_limit,
            next_retry_at,
        }
    }

    /// A failed step that can never run again: permanently failed or out of
    /// attempts. These are what block a task, as opposed to failed steps
    /// waiting out a backoff window.
    pub fn terminally_failed(&self) -> bool {
        self.current_state == WorkflowStepState::Failed
            && !(self.retryable && self.attempts < self.retry_limit)
    }

    /// Load and evaluate readiness for every step of a task, ordered by step
    /// uuid so downstream tie-breaking is deterministic
    pub async fn for_task(
        pool: &PgPool,
        task_uuid: Uuid,
        backoff: &BackoffCalculator,
    ) -> TaskerResult<Vec<StepReadiness>> {
        let now = chrono::Utc::now().naive_utc();
        let inputs = load_readiness_inputs(pool, task_uuid).await?;
        Ok(inputs
            .iter()
            .map(|input| StepReadiness::evaluate(input, backoff, now))
            .collect())
    }
}

/// Assemble raw readiness inputs from the durable model
pub async fn load_readiness_inputs(
    pool: &PgPool,
    task_uuid: Uuid,
) -> TaskerResult<Vec<StepReadinessInput>> {
    let steps = WorkflowStep::list_by_task(pool, task_uuid).await?;
    if steps.is_empty() {
        return Ok(Vec::new());
    }

    let edges = WorkflowStepEdge::list_by_task(pool, task_uuid).await?;
    let states = WorkflowStepTransition::current_states_for_task(pool, task_uuid).await?;
    let failures = WorkflowStepTransition::last_failure_times_for_task(pool, task_uuid).await?;
    let names = step_names_for_task(pool, task_uuid).await?;

    let state_by_step: HashMap<Uuid, WorkflowStepState> = states
        .into_iter()
        .map(|(uuid, state)| {
            WorkflowStepState::from_str(&state)
                .map(|parsed| (uuid, parsed))
                .map_err(TaskerError::OrchestrationError)
        })
        .collect::<TaskerResult<_>>()?;
    let failure_by_step: HashMap<Uuid, NaiveDateTime> = failures.into_iter().collect();

    let mut parents_by_step: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in &edges {
        parents_by_step
            .entry(edge.to_step_uuid)
            .or_default()
            .push(edge.from_step_uuid);
    }

    let current_state_of = |uuid: Uuid| {
        state_by_step
            .get(&uuid)
            .copied()
            .unwrap_or(WorkflowStepState::Pending)
    };

    Ok(steps
        .iter()
        .map(|step| {
            let parent_states = parents_by_step
                .get(&step.workflow_step_uuid)
                .map(|parents| parents.iter().map(|p| current_state_of(*p)).collect())
                .unwrap_or_default();

            StepReadinessInput {
                workflow_step_uuid: step.workflow_step_uuid,
                task_uuid: step.task_uuid,
                named_step: names
                    .get(&step.workflow_step_uuid)
                    .cloned()
                    .unwrap_or_default(),
                current_state: current_state_of(step.workflow_step_uuid),
                parent_states,
                attempts: step.attempts,
                retry_limit: step.retry_limit,
                retryable: step.retryable,
                backoff_request_seconds: step.backoff_request_seconds,
                last_attempted_at: step.last_attempted_at,
                last_failure_at: failure_by_step.get(&step.workflow_step_uuid).copied(),
            }
        })
        .collect())
}

async fn step_names_for_task(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<HashMap<Uuid, String>> {
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT ws.workflow_step_uuid, ns.name \
         FROM workflow_steps ws \
         JOIN named_steps ns ON ns.named_step_uuid = ws.named_step_uuid \
         WHERE ws.task_uuid = $1",
    )
    .bind(task_uuid)
    .fetch_all(pool)
    .await
    .map_err(|e| TaskerError::database("step_names_for_task", e))?;
    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    fn base_input(state: WorkflowStepState) -> StepReadinessInput {
        StepReadinessInput {
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
        }
    }

    #[test]
    fn test_root_step_is_ready_with_zeroed_parent_counts() {
        let readiness = StepReadiness::evaluate(
            &base_input(WorkflowStepState::Pending),
            &BackoffCalculator::default(),
            now(),
        );
        assert_eq!(readiness.total_parents, 0);
        assert_eq!(readiness.completed_parents, 0);
        assert!(readiness.dependencies_satisfied);
        assert!(readiness.ready_for_execution);
    }

    #[test]
    fn test_incomplete_parents_block_execution() {
        let mut input = base_input(WorkflowStepState::Pending);
        input.parent_states = vec![WorkflowStepState::Complete, WorkflowStepState::Pending];
        let readiness =
            StepReadiness::evaluate(&input, &BackoffCalculator::default(), now());
        assert_eq!(readiness.total_parents, 2);
        assert_eq!(readiness.completed_parents, 1);
        assert!(!readiness.dependencies_satisfied);
        assert!(!readiness.ready_for_execution);
    }

    #[test]
    fn test_resolved_manually_counts_as_completed_parent() {
        let mut input = base_input(WorkflowStepState::Pending);
        input.parent_states = vec![
            WorkflowStepState::Complete,
            WorkflowStepState::ResolvedManually,
        ];
        let readiness =
            StepReadiness::evaluate(&input, &BackoffCalculator::default(), now());
        assert_eq!(readiness.completed_parents, 2);
        assert!(readiness.ready_for_execution);
    }

    #[test]
    fn test_retry_limit_exhaustion_blocks_readiness() {
        let mut input = base_input(WorkflowStepState::Failed);
        input.attempts = 3;
        input.retry_limit = 3;
        let readiness =
            StepReadiness::evaluate(&input, &BackoffCalculator::default(), now());
        assert!(!readiness.retry_eligible);
        assert!(!readiness.ready_for_execution);
    }

    #[test]
    fn test_explicit_backoff_blocks_even_unfailed_steps() {
        let current = now();
        let mut input = base_input(WorkflowStepState::Pending);
        input.backoff_request_seconds = Some(30);
        input.last_attempted_at = Some(current - Duration::seconds(2));
        let readiness =
            StepReadiness::evaluate(&input, &BackoffCalculator::default(), current);
        assert!(!readiness.ready_for_execution);
        assert!(readiness.next_retry_at.is_some());
    }

    #[test]
    fn test_failed_step_waits_out_exponential_backoff() {
        let current = now();
        let mut input = base_input(WorkflowStepState::Failed);
        input.attempts = 2;
        input.last_attempted_at = Some(current - Duration::seconds(1));
        input.last_failure_at = Some(current - Duration::seconds(1));
        // 2^2 = 4s window, only 1s elapsed
        let readiness =
            StepReadiness::evaluate(&input, &BackoffCalculator::default(), current);
        assert!(!readiness.ready_for_execution);

        // After the window the step is ready again
        let readiness = StepReadiness::evaluate(
            &input,
            &BackoffCalculator::default(),
            current + Duration::seconds(4),
        );
        assert!(readiness.ready_for_execution);
    }

    #[test]
    fn test_permanently_failed_step_never_ready() {
        let mut input = base_input(WorkflowStepState::Failed);
        input.retryable = false;
        input.attempts = 1;
        let readiness =
            StepReadiness::evaluate(&input, &BackoffCalculator::default(), now());
        assert!(!readiness.ready_for_execution);
    }

    #[test]
    fn test_non_executable_states_are_not_ready() {
        for state in [
            WorkflowStepState::InProgress,
            WorkflowStepState::Complete,
            WorkflowStepState::Cancelled,
            WorkflowStepState::ResolvedManually,
        ] {
            let readiness = StepReadiness::evaluate(
                &base_input(state),
                &BackoffCalculator::default(),
                now(),
            );
            assert!(
                !readiness.ready_for_execution,
                "{state} must not be ready for execution"
            );
        }
    }
}
