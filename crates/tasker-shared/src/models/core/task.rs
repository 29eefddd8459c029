//! # Task
//!
//! A live workflow instance. Owns its workflow steps and their edges
//! transitively (ON DELETE CASCADE); current state lives in the transition
//! history and is read through [`Task::get_current_state`].

use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Task {
    pub task_uuid: Uuid,
    pub named_task_uuid: Uuid,
    pub complete: bool,
    pub requested_at: NaiveDateTime,
    pub initiator: Option<String>,
    pub source_system: Option<String>,
    pub reason: Option<String>,
    pub bypass_steps: Option<Value>,
    pub tags: Option<Value>,
    pub context: Option<Value>,
    pub identity_hash: String,
    pub priority: i32,
    /// Demand ordered (one at a time) step execution for this task
    pub sequential: bool,
    pub correlation_id: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Attributes for inserting a new task row
#[derive(Debug, Clone)]
pub struct NewTask {
    pub named_task_uuid: Uuid,
    pub requested_at: NaiveDateTime,
    pub initiator: Option<String>,
    pub source_system: Option<String>,
    pub reason: Option<String>,
    pub bypass_steps: Option<Value>,
    pub tags: Option<Value>,
    pub context: Option<Value>,
    pub identity_hash: String,
    pub priority: i32,
    pub sequential: bool,
    pub correlation_id: Uuid,
}

const SELECT_COLUMNS: &str = "task_uuid, named_task_uuid, complete, requested_at, initiator, \
     source_system, reason, bypass_steps, tags, context, identity_hash, priority, \
     sequential, correlation_id, created_at, updated_at";

impl Task {
    /// Columns clients may sort task listings by
    pub const SORTABLE_COLUMNS: &'static [&'static str] =
        &["created_at", "updated_at", "requested_at", "priority"];

    /// Insert a new task. A duplicate identity hash within the dedup window
    /// surfaces as a validation error, not a database error.
    pub async fn create(pool: &PgPool, new_task: NewTask) -> TaskerResult<Task> {
        let task_uuid = Uuid::now_v7();
        let row = sqlx::query_as::<_, Task>(&format!(
            "INSERT INTO tasks (task_uuid, named_task_uuid, requested_at, initiator, \
                source_system, reason, bypass_steps, tags, context, identity_hash, \
                priority, sequential, correlation_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(task_uuid)
        .bind(new_task.named_task_uuid)
        .bind(new_task.requested_at)
        .bind(new_task.initiator)
        .bind(new_task.source_system)
        .bind(new_task.reason)
        .bind(new_task.bypass_steps)
        .bind(new_task.tags)
        .bind(new_task.context)
        .bind(&new_task.identity_hash)
        .bind(new_task.priority)
        .bind(new_task.sequential)
        .bind(new_task.correlation_id)
        .fetch_one(pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => TaskerError::ValidationError(
                format!("duplicate task identity {}", new_task.identity_hash),
            ),
            _ => TaskerError::database("create_task", e),
        })?;
        Ok(row)
    }

    pub async fn find_by_id(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(&format!(
            "SELECT {SELECT_COLUMNS} FROM tasks WHERE task_uuid = $1"
        ))
        .bind(task_uuid)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("find_task", e))?;
        Ok(row)
    }

    pub async fn find_by_identity_hash(
        pool: &PgPool,
        identity_hash: &str,
    ) -> TaskerResult<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(&format!(
            "SELECT {SELECT_COLUMNS} FROM tasks WHERE identity_hash = $1"
        ))
        .bind(identity_hash)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("find_task_by_identity", e))?;
        Ok(row)
    }

    /// List tasks with validated pagination. `sort_by` must already be one of
    /// [`Task::SORTABLE_COLUMNS`]; anything else falls back to `created_at`.
    pub async fn list(
        pool: &PgPool,
        limit: i64,
        offset: i64,
        sort_by: &str,
        descending: bool,
    ) -> TaskerResult<Vec<Task>> {
        let sort_column = if Self::SORTABLE_COLUMNS.contains(&sort_by) {
            sort_by
        } else {
            "created_at"
        };
        let direction = if descending { "DESC" } else { "ASC" };

        let rows = sqlx::query_as::<_, Task>(&format!(
            "SELECT {SELECT_COLUMNS} FROM tasks \
             ORDER BY {sort_column} {direction} LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(|e| TaskerError::database("list_tasks", e))?;
        Ok(rows)
    }

    /// Update the caller-mutable attributes (reason and tags only)
    pub async fn update_mutable(
        pool: &PgPool,
        task_uuid: Uuid,
        reason: Option<String>,
        tags: Option<Value>,
    ) -> TaskerResult<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET reason = COALESCE($2, reason), tags = COALESCE($3, tags), \
                updated_at = NOW() \
             WHERE task_uuid = $1 \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(task_uuid)
        .bind(reason)
        .bind(tags)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("update_task", e))?;
        Ok(row)
    }

    /// Flip the completion flag once the finalizer marks the task complete
    pub async fn mark_complete(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<()> {
        sqlx::query("UPDATE tasks SET complete = TRUE, updated_at = NOW() WHERE task_uuid = $1")
            .bind(task_uuid)
            .execute(pool)
            .await
            .map_err(|e| TaskerError::database("mark_task_complete", e))?;
        Ok(())
    }

    /// Current state per the latest transition row; `None` before initialization
    pub async fn get_current_state(&self, pool: &PgPool) -> TaskerResult<Option<String>> {
        let state: Option<(String,)> = sqlx::query_as(
            "SELECT to_state FROM task_transitions WHERE task_uuid = $1 AND most_recent",
        )
        .bind(self.task_uuid)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("get_task_state", e))?;
        Ok(state.map(|(s,)| s))
    }

    /// Destroy the task and, transitively, its steps, edges, and transitions
    pub async fn delete(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE task_uuid = $1")
            .bind(task_uuid)
            .execute(pool)
            .await
            .map_err(|e| TaskerError::database("delete_task", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::named_task::NamedTask;
    use crate::models::core::task_namespace::TaskNamespace;
    use serde_json::json;

    async fn fixture_named_task(pool: &PgPool) -> anyhow::Result<NamedTask> {
        let ns = TaskNamespace::find_or_create(pool, "task_model_test", None).await?;
        Ok(NamedTask::find_or_create(pool, ns.task_namespace_uuid, "order_flow", "1.0.0", None)
            .await?)
    }

    fn new_task(named_task_uuid: Uuid, identity: &str) -> NewTask {
        NewTask {
            named_task_uuid,
            requested_at: chrono::Utc::now().naive_utc(),
            initiator: Some("tests".to_string()),
            source_system: Some("suite".to_string()),
            reason: Some("model coverage".to_string()),
            bypass_steps: None,
            tags: Some(json!(["a", "b"])),
            context: Some(json!({"order_id": 9})),
            identity_hash: identity.to_string(),
            priority: 0,
            sequential: false,
            correlation_id: Uuid::now_v7(),
        }
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_create_and_read_back_preserves_attributes(pool: PgPool) -> anyhow::Result<()> {
        let named = fixture_named_task(&pool).await?;
        let created = Task::create(&pool, new_task(named.named_task_uuid, "identity-1")).await?;

        let found = Task::find_by_id(&pool, created.task_uuid)
            .await?
            .expect("task should exist");
        assert_eq!(found.context, Some(json!({"order_id": 9})));
        assert_eq!(found.tags, Some(json!(["a", "b"])));
        assert_eq!(found.reason.as_deref(), Some("model coverage"));
        assert_eq!(found.initiator.as_deref(), Some("tests"));
        assert_eq!(found.source_system.as_deref(), Some("suite"));
        assert!(!found.complete);
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_duplicate_identity_hash_rejected(pool: PgPool) -> anyhow::Result<()> {
        let named = fixture_named_task(&pool).await?;
        Task::create(&pool, new_task(named.named_task_uuid, "identity-dup")).await?;

        let second = Task::create(&pool, new_task(named.named_task_uuid, "identity-dup")).await;
        assert!(matches!(second, Err(TaskerError::ValidationError(_))));
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_update_mutable_only_touches_reason_and_tags(pool: PgPool) -> anyhow::Result<()> {
        let named = fixture_named_task(&pool).await?;
        let task = Task::create(&pool, new_task(named.named_task_uuid, "identity-upd")).await?;

        let updated =
            Task::update_mutable(&pool, task.task_uuid, Some("revised".to_string()), None)
                .await?
                .expect("task should exist");
        assert_eq!(updated.reason.as_deref(), Some("revised"));
        // Tags untouched when not supplied
        assert_eq!(updated.tags, Some(json!(["a", "b"])));
        // Context is not caller-mutable
        assert_eq!(updated.context, task.context);
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_list_falls_back_on_unknown_sort_column(pool: PgPool) -> anyhow::Result<()> {
        let named = fixture_named_task(&pool).await?;
        Task::create(&pool, new_task(named.named_task_uuid, "identity-l1")).await?;
        Task::create(&pool, new_task(named.named_task_uuid, "identity-l2")).await?;

        // An injected column name is not interpolated; we fall back to created_at
        let rows = Task::list(&pool, 20, 0, "garbage; DROP TABLE tasks", false).await?;
        assert_eq!(rows.len(), 2);
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::MIGRATOR")]
    async fn test_delete_cascades(pool: PgPool) -> anyhow::Result<()> {
        let named = fixture_named_task(&pool).await?;
        let task = Task::create(&pool, new_task(named.named_task_uuid, "identity-del")).await?;

        assert!(Task::delete(&pool, task.task_uuid).await?);
        assert!(Task::find_by_id(&pool, task.task_uuid).await?.is_none());
        assert!(!Task::delete(&pool, task.task_uuid).await?);
        Ok(())
    }
}
