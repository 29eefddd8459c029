//! # Task Transition
//!
//! Append-only state history for tasks. Rows are immutable except for the
//! `most_recent` flag, which flips atomically when a successor row lands.
//! The partial unique index on (task_uuid) WHERE most_recent makes the
//! current-state invariant a database guarantee.

use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskTransition {
    pub task_transition_uuid: Uuid,
    pub task_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub most_recent: bool,
    pub sort_key: i32,
    pub metadata: Option<Value>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewTaskTransition {
    pub task_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub metadata: Option<Value>,
}

impl TaskTransition {
    /// Append a transition row, flipping the previous `most_recent` flag.
    /// Does not validate the transition against the state machine table;
    /// callers that need guarding use [`TaskTransition::create_guarded`].
    pub async fn create(pool: &PgPool, new: NewTaskTransition) -> TaskerResult<TaskTransition> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| TaskerError::database("begin_task_transition", e))?;
        let row = Self::append_in(&mut tx, &new).await?;
        tx.commit()
            .await
            .map_err(|e| TaskerError::database("commit_task_transition", e))?;
        Ok(row)
    }

    /// Append a transition only when the current state matches `expected_from`.
    ///
    /// The current row is locked FOR UPDATE, so of two workers racing the same
    /// transition exactly one wins; the other observes a guard failure. The
    /// persisted `from_state` is the observed current state, not the caller's
    /// guess.
    pub async fn create_guarded(
        pool: &PgPool,
        mut new: NewTaskTransition,
        expected_from: &[Option<&str>],
    ) -> TaskerResult<TaskTransition> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| TaskerError::database("begin_task_transition", e))?;

        let current: Option<(String,)> = sqlx::query_as(
            "SELECT to_state FROM task_transitions \
             WHERE task_uuid = $1 AND most_recent FOR UPDATE",
        )
        .bind(new.task_uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| TaskerError::database("lock_current_task_transition", e))?;

        let current_state = current.map(|(s,)| s);
        let matches_guard = expected_from
            .iter()
            .any(|expected| expected.as_deref() == current_state.as_deref());
        if !matches_guard {
            return Err(TaskerError::GuardFailed {
                entity_type: "Task".to_string(),
                entity_uuid: new.task_uuid,
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
            .map_err(|e| TaskerError::database("commit_task_transition", e))?;
        Ok(row)
    }

    async fn append_in(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewTaskTransition,
    ) -> TaskerResult<TaskTransition> {
        sqlx::query("UPDATE task_transitions SET most_recent = FALSE WHERE task_uuid = $1 AND most_recent")
            .bind(new.task_uuid)
            .execute(&mut **tx)
            .await
            .map_err(|e| TaskerError::database("retire_task_transition", e))?;

        let row = sqlx::query_as::<_, TaskTransition>(
            "INSERT INTO task_transitions (task_transition_uuid, task_uuid, to_state, \
                from_state, most_recent, sort_key, metadata) \
             VALUES ($1, $2, $3, $4, TRUE, \
                (SELECT COALESCE(MAX(sort_key) + 1, 0) FROM task_transitions WHERE task_uuid = $2), \
                $5) \
             RETURNING task_transition_uuid, task_uuid, to_state, from_state, most_recent, \
                sort_key, metadata, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(new.task_uuid)
        .bind(&new.to_state)
        .bind(&new.from_state)
        .bind(&new.metadata)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| TaskerError::database("insert_task_transition", e))?;
        Ok(row)
    }

    /// The single row carrying `most_recent = true`, if any transition exists
    pub async fn get_current(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<Option<TaskTransition>> {
        let row = sqlx::query_as::<_, TaskTransition>(
            "SELECT task_transition_uuid, task_uuid, to_state, from_state, most_recent, \
                sort_key, metadata, created_at \
             FROM task_transitions WHERE task_uuid = $1 AND most_recent",
        )
        .bind(task_uuid)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("get_current_task_transition", e))?;
        Ok(row)
    }

    /// Full history ordered by sort key (creation order)
    pub async fn history(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<Vec<TaskTransition>> {
        let rows = sqlx::query_as::<_, TaskTransition>(
            "SELECT task_transition_uuid, task_uuid, to_state, from_state, most_recent, \
                sort_key, metadata, created_at \
             FROM task_transitions WHERE task_uuid = $1 ORDER BY sort_key",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await
        .map_err(|e| TaskerError::database("task_transition_history", e))?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::named_task::NamedTask;
    use crate::models::core::task::{NewTask, Task};
    use crate::models::core::task_namespace::TaskNamespace;

    async fn fixture_task(pool: &PgPool) -> anyhow::Result<Task> {
        let ns = TaskNamespace::find_or_create(pool, "task_transition_test", None).await?;
        let named =
            NamedTask::find_or_create(pool, ns.task_namespace_uuid, "flow", "1.0.0", None).await?;
        Ok(Task::create(
            pool,
            NewTask {
                named_task_uuid: named.named_task_uuid,
                requested_at: chrono::Utc::now().naive_utc(),
                initiator: None,
                source_system: None,
                reason: None,
                bypass_steps: None,
                tags: None,
                context: None,
                identity_hash: format!("transition-{}", Uuid::now_v7()),
                priority: 0,
                sequential: false,
                correlation_id: Uuid::now_v7(),
            },
        )
        .await?)
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_exactly_one_most_recent_row(pool: PgPool) -> anyhow::Result<()> {
        let task = fixture_task(&pool).await?;

        for (from, to) in [(None, "pending"), (Some("pending"), "in_progress")] {
            TaskTransition::create(
                &pool,
                NewTaskTransition {
                    task_uuid: task.task_uuid,
                    to_state: to.to_string(),
                    from_state: from.map(str::to_string),
                    metadata: None,
                },
            )
            .await?;
        }

        let history = TaskTransition::history(&pool, task.task_uuid).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|t| t.most_recent).count(), 1);

        let current = TaskTransition::get_current(&pool, task.task_uuid)
            .await?
            .expect("current transition");
        assert_eq!(current.to_state, "in_progress");
        assert_eq!(current.sort_key, 1);
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_guarded_create_rejects_wrong_from_state(pool: PgPool) -> anyhow::Result<()> {
        let task = fixture_task(&pool).await?;
        TaskTransition::create(
            &pool,
            NewTaskTransition {
                task_uuid: task.task_uuid,
                to_state: "pending".to_string(),
                from_state: None,
                metadata: None,
            },
        )
        .await?;

        // complete is only reachable from in_progress
        let result = TaskTransition::create_guarded(
            &pool,
            NewTaskTransition {
                task_uuid: task.task_uuid,
                to_state: "complete".to_string(),
                from_state: None,
                metadata: None,
            },
            &[Some("in_progress")],
        )
        .await;
        assert!(matches!(result, Err(TaskerError::GuardFailed { .. })));

        // State unchanged
        let current = TaskTransition::get_current(&pool, task.task_uuid).await?.unwrap();
        assert_eq!(current.to_state, "pending");
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_guarded_create_records_observed_from_state(pool: PgPool) -> anyhow::Result<()> {
        let task = fixture_task(&pool).await?;
        TaskTransition::create(
            &pool,
            NewTaskTransition {
                task_uuid: task.task_uuid,
                to_state: "pending".to_string(),
                from_state: None,
                metadata: None,
            },
        )
        .await?;

        let row = TaskTransition::create_guarded(
            &pool,
            NewTaskTransition {
                task_uuid: task.task_uuid,
                to_state: "in_progress".to_string(),
                from_state: None,
                metadata: Some(serde_json::json!({"triggered_by": "test"})),
            },
            &[Some("pending")],
        )
        .await?;
        assert_eq!(row.from_state.as_deref(), Some("pending"));
        Ok(())
    }
}
