//! # Workflow Step Transition
//!
//! Append-only state history for workflow steps, mirroring the task
//! transition model. Also supplies the bulk state and failure-time queries
//! the readiness projection aggregates over.

use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkflowStepTransition {
    pub workflow_step_transition_uuid: Uuid,
    pub workflow_step_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub most_recent: bool,
    pub sort_key: i32,
    pub metadata: Option<Value>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewWorkflowStepTransition {
    pub workflow_step_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub metadata: Option<Value>,
}

impl WorkflowStepTransition {
    /// Append a transition row, flipping the previous `most_recent` flag
    pub async fn create(
        pool: &PgPool,
        new: NewWorkflowStepTransition,
    ) -> TaskerResult<WorkflowStepTransition> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| TaskerError::database("begin_step_transition", e))?;
        let row = Self::append_in(&mut tx, &new).await?;
        tx.commit()
            .await
            .map_err(|e| TaskerError::database("commit_step_transition", e))?;
        Ok(row)
    }

    /// Append a transition only when the current state matches `expected_from`.
    /// Whichever worker's lock lands first wins; the loser observes a guard
    /// failure and skips the step.
    pub async fn create_guarded(
        pool: &PgPool,
        mut new: NewWorkflowStepTransition,
        expected_from: &[Option<&str>],
    ) -> TaskerResult<WorkflowStepTransition> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| TaskerError::database("begin_step_transition", e))?;

        let current: Option<(String,)> = sqlx::query_as(
            "SELECT to_state FROM workflow_step_transitions \
             WHERE workflow_step_uuid = $1 AND most_recent FOR UPDATE",
        )
        .bind(new.workflow_step_uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| TaskerError::database("lock_current_step_transition", e))?;

        let current_state = current.map(|(s,)| s);
        let matches_guard = expected_from
            .iter()
            .any(|expected| expected.as_deref() == current_state.as_deref());
        if !matches_guard {
            return Err(TaskerError::GuardFailed {
                entity_type: "WorkflowStep".to_string(),
                entity_uuid: new.workflow_step_uuid,
                reason: format!(
                    "current state {current_state:?} does not permit transition to {}",
                    new.to_state
                ),
            });
        }

        new.from_state = current_state;
        let row = Self::append_in(&mut tx, &new).await?;
        tx.commit()
            .await
            .map_err(|e| TaskerError::database("commit_step_transition", e))?;
        Ok(row)
    }

    async fn append_in(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewWorkflowStepTransition,
    ) -> TaskerResult<WorkflowStepTransition> {
        sqlx::query(
            "UPDATE workflow_step_transitions SET most_recent = FALSE \
             WHERE workflow_step_uuid = $1 AND most_recent",
        )
        .bind(new.workflow_step_uuid)
        .execute(&mut **tx)
        .await
        .map_err(|e| TaskerError::database("retire_step_transition", e))?;

        let row = sqlx::query_as::<_, WorkflowStepTransition>(
            "INSERT INTO workflow_step_transitions (workflow_step_transition_uuid, \
                workflow_step_uuid, to_state, from_state, most_recent, sort_key, metadata) \
             VALUES ($1, $2, $3, $4, TRUE, \
                (SELECT COALESCE(MAX(sort_key) + 1, 0) FROM workflow_step_transitions \
                 WHERE workflow_step_uuid = $2), \
                $5) \
             RETURNING workflow_step_transition_uuid, workflow_step_uuid, to_state, from_state, \
                most_recent, sort_key, metadata, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(new.workflow_step_uuid)
        .bind(&new.to_state)
        .bind(&new.from_state)
        .bind(&new.metadata)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| TaskerError::database("insert_step_transition", e))?;
        Ok(row)
    }

    pub async fn get_current(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
    ) -> TaskerResult<Option<WorkflowStepTransition>> {
        let row = sqlx::query_as::<_, WorkflowStepTransition>(
            "SELECT workflow_step_transition_uuid, workflow_step_uuid, to_state, from_state, \
                most_recent, sort_key, metadata, created_at \
             FROM workflow_step_transitions WHERE workflow_step_uuid = $1 AND most_recent",
        )
        .bind(workflow_step_uuid)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("get_current_step_transition", e))?;
        Ok(row)
    }

    pub async fn history(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
    ) -> TaskerResult<Vec<WorkflowStepTransition>> {
        let rows = sqlx::query_as::<_, WorkflowStepTransition>(
            "SELECT workflow_step_transition_uuid, workflow_step_uuid, to_state, from_state, \
                most_recent, sort_key, metadata, created_at \
             FROM workflow_step_transitions WHERE workflow_step_uuid = $1 ORDER BY sort_key",
        )
        .bind(workflow_step_uuid)
        .fetch_all(pool)
        .await
        .map_err(|e| TaskerError::database("step_transition_history", e))?;
        Ok(rows)
    }

    /// Current state of every step in a task, in one query. Steps with no
    /// transition yet are absent; callers default them to pending.
    pub async fn current_states_for_task(
        pool: &PgPool,
        task_uuid: Uuid,
    ) -> TaskerResult<Vec<(Uuid, String)>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT t.workflow_step_uuid, t.to_state \
             FROM workflow_step_transitions t \
             JOIN workflow_steps ws ON ws.workflow_step_uuid = t.workflow_step_uuid \
             WHERE ws.task_uuid = $1 AND t.most_recent",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await
        .map_err(|e| TaskerError::database("current_states_for_task", e))?;
        Ok(rows)
    }

    /// Most recent failure timestamp per step of a task, for backoff timing
    pub async fn last_failure_times_for_task(
        pool: &PgPool,
        task_uuid: Uuid,
    ) -> TaskerResult<Vec<(Uuid, NaiveDateTime)>> {
        let rows: Vec<(Uuid, NaiveDateTime)> = sqlx::query_as(
            "SELECT t.workflow_step_uuid, MAX(t.created_at) \
             FROM workflow_step_transitions t \
             JOIN workflow_steps ws ON ws.workflow_step_uuid = t.workflow_step_uuid \
             WHERE ws.task_uuid = $1 AND t.to_state = 'failed' \
             GROUP BY t.workflow_step_uuid",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await
        .map_err(|e| TaskerError::database("last_failure_times", e))?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::dependent_system::DependentSystem;
    use crate::models::core::named_step::NamedStep;
    use crate::models::core::named_task::NamedTask;
    use crate::models::core::task::{NewTask, Task};
    use crate::models::core::task_namespace::TaskNamespace;
    use crate::models::core::workflow_step::{NewWorkflowStep, WorkflowStep};

    async fn fixture_step(pool: &PgPool) -> anyhow::Result<WorkflowStep> {
        let ns = TaskNamespace::find_or_create(pool, "step_transition_test", None).await?;
        let named_task =
            NamedTask::find_or_create(pool, ns.task_namespace_uuid, "flow", "1.0.0", None).await?;
        let system = DependentSystem::find_or_create(pool, "step_transition_system", None).await?;
        let named_step =
            NamedStep::find_or_create(pool, system.dependent_system_uuid, "work", None).await?;
        let task = Task::create(
            pool,
            NewTask {
                named_task_uuid: named_task.named_task_uuid,
                requested_at: chrono::Utc::now().naive_utc(),
                initiator: None,
                source_system: None,
                reason: None,
                bypass_steps: None,
                tags: None,
                context: None,
                identity_hash: format!("step-transition-{}", Uuid::now_v7()),
                priority: 0,
                sequential: false,
                correlation_id: Uuid::now_v7(),
            },
        )
        .await?;
        Ok(WorkflowStep::create(
            pool,
            NewWorkflowStep {
                task_uuid: task.task_uuid,
                named_step_uuid: named_step.named_step_uuid,
                retryable: true,
                retry_limit: 3,
                skippable: false,
                inputs: None,
            },
        )
        .await?)
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_most_recent_flag_flips(pool: PgPool) -> anyhow::Result<()> {
        let step = fixture_step(&pool).await?;

        for to in ["pending", "in_progress", "failed"] {
            WorkflowStepTransition::create(
                &pool,
                NewWorkflowStepTransition {
                    workflow_step_uuid: step.workflow_step_uuid,
                    to_state: to.to_string(),
                    from_state: None,
                    metadata: None,
                },
            )
            .await?;
        }

        let history = WorkflowStepTransition::history(&pool, step.workflow_step_uuid).await?;
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().filter(|t| t.most_recent).count(), 1);
        assert_eq!(history.last().unwrap().to_state, "failed");
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_guard_failure_leaves_state_untouched(pool: PgPool) -> anyhow::Result<()> {
        let step = fixture_step(&pool).await?;
        WorkflowStepTransition::create(
            &pool,
            NewWorkflowStepTransition {
                workflow_step_uuid: step.workflow_step_uuid,
                to_state: "pending".to_string(),
                from_state: None,
                metadata: None,
            },
        )
        .await?;

        let result = WorkflowStepTransition::create_guarded(
            &pool,
            NewWorkflowStepTransition {
                workflow_step_uuid: step.workflow_step_uuid,
                to_state: "complete".to_string(),
                from_state: None,
                metadata: None,
            },
            &[Some("in_progress")],
        )
        .await;
        assert!(matches!(result, Err(TaskerError::GuardFailed { .. })));

        let current = WorkflowStepTransition::get_current(&pool, step.workflow_step_uuid)
            .await?
            .unwrap();
        assert_eq!(current.to_state, "pending");
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_failure_times_only_cover_failed_transitions(pool: PgPool) -> anyhow::Result<()> {
        let step = fixture_step(&pool).await?;
        for to in ["pending", "in_progress", "failed"] {
            WorkflowStepTransition::create(
                &pool,
                NewWorkflowStepTransition {
                    workflow_step_uuid: step.workflow_step_uuid,
                    to_state: to.to_string(),
                    from_state: None,
                    metadata: None,
                },
            )
            .await?;
        }

        let times =
            WorkflowStepTransition::last_failure_times_for_task(&pool, step.task_uuid).await?;
        assert_eq!(times.len(), 1);
        assert_eq!(times[0].0, step.workflow_step_uuid);
        Ok(())
    }
}
