//! Named task: the template a live task is instantiated from.
//! Unique per (namespace, name, version).

use chrono::NaiveDateTime;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NamedTask {
    pub named_task_uuid: Uuid,
    pub task_namespace_uuid: Uuid,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NamedTask {
    pub async fn find_or_create(
        pool: &PgPool,
        task_namespace_uuid: Uuid,
        name: &str,
        version: &str,
        description: Option<&str>,
    ) -> TaskerResult<NamedTask> {
        let row = sqlx::query_as::<_, NamedTask>(
            "INSERT INTO named_tasks (named_task_uuid, task_namespace_uuid, name, version, description) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (task_namespace_uuid, name, version) DO UPDATE SET updated_at = NOW() \
             RETURNING named_task_uuid, task_namespace_uuid, name, version, description, created_at, updated_at",
        )
        .bind(Uuid::now_v7())
        .bind(task_namespace_uuid)
        .bind(name)
        .bind(version)
        .bind(description)
        .fetch_one(pool)
        .await
        .map_err(|e| TaskerError::database("find_or_create_named_task", e))?;
        Ok(row)
    }

    pub async fn find_by_id(pool: &PgPool, named_task_uuid: Uuid) -> TaskerResult<Option<NamedTask>> {
        let row = sqlx::query_as::<_, NamedTask>(
            "SELECT named_task_uuid, task_namespace_uuid, name, version, description, created_at, updated_at \
             FROM named_tasks WHERE named_task_uuid = $1",
        )
        .bind(named_task_uuid)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("find_named_task", e))?;
        Ok(row)
    }

    /// Resolve a template row by its logical coordinates
    pub async fn find_by_coordinates(
        pool: &PgPool,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> TaskerResult<Option<NamedTask>> {
        let row = sqlx::query_as::<_, NamedTask>(
            "SELECT nt.named_task_uuid, nt.task_namespace_uuid, nt.name, nt.version, nt.description, \
                    nt.created_at, nt.updated_at \
             FROM named_tasks nt \
             JOIN task_namespaces ns ON ns.task_namespace_uuid = nt.task_namespace_uuid \
             WHERE ns.name = $1 AND nt.name = $2 AND nt.version = $3",
        )
        .bind(namespace)
        .bind(name)
        .bind(version)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("find_named_task_by_coordinates", e))?;
        Ok(row)
    }
}
