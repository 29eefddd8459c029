//! Task namespace: grouping for task definitions. Shared across tasks,
//! process-wide lifecycle, populated by template registration.

use chrono::NaiveDateTime;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskNamespace {
    pub task_namespace_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TaskNamespace {
    /// Find a namespace by its unique name
    pub async fn find_by_name(pool: &PgPool, name: &str) -> TaskerResult<Option<TaskNamespace>> {
        let row = sqlx::query_as::<_, TaskNamespace>(
            "SELECT task_namespace_uuid, name, description, created_at, updated_at \
             FROM task_namespaces WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("find_namespace", e))?;
        Ok(row)
    }

    /// Find or create a namespace, returning the persisted row either way
    pub async fn find_or_create(
        pool: &PgPool,
        name: &str,
        description: Option<&str>,
    ) -> TaskerResult<TaskNamespace> {
        if name.is_empty() || name.len() > 64 {
            return Err(TaskerError::ValidationError(format!(
                "namespace name must be 1-64 characters, got {}",
                name.len()
            )));
        }

        let row = sqlx::query_as::<_, TaskNamespace>(
            "INSERT INTO task_namespaces (task_namespace_uuid, name, description) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO UPDATE SET updated_at = NOW() \
             RETURNING task_namespace_uuid, name, description, created_at, updated_at",
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .bind(description)
        .fetch_one(pool)
        .await
        .map_err(|e| TaskerError::database("find_or_create_namespace", e))?;
        Ok(row)
    }

    /// List all namespaces ordered by name
    pub async fn list(pool: &PgPool) -> TaskerResult<Vec<TaskNamespace>> {
        let rows = sqlx::query_as::<_, TaskNamespace>(
            "SELECT task_namespace_uuid, name, description, created_at, updated_at \
             FROM task_namespaces ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| TaskerError::database("list_namespaces", e))?;
        Ok(rows)
    }
}
