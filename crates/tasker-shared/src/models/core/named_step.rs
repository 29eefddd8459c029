//! Named step: a step template attached to a dependent system.
//! Unique per (dependent system, name).

use chrono::NaiveDateTime;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NamedStep {
    pub named_step_uuid: Uuid,
    pub dependent_system_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NamedStep {
    pub async fn find_or_create(
        pool: &PgPool,
        dependent_system_uuid: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> TaskerResult<NamedStep> {
        let row = sqlx::query_as::<_, NamedStep>(
            "INSERT INTO named_steps (named_step_uuid, dependent_system_uuid, name, description) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (dependent_system_uuid, name) DO UPDATE SET updated_at = NOW() \
             RETURNING named_step_uuid, dependent_system_uuid, name, description, created_at, updated_at",
        )
        .bind(Uuid::now_v7())
        .bind(dependent_system_uuid)
        .bind(name)
        .bind(description)
        .fetch_one(pool)
        .await
        .map_err(|e| TaskerError::database("find_or_create_named_step", e))?;
        Ok(row)
    }

    pub async fn find_by_id(pool: &PgPool, named_step_uuid: Uuid) -> TaskerResult<Option<NamedStep>> {
        let row = sqlx::query_as::<_, NamedStep>(
            "SELECT named_step_uuid, dependent_system_uuid, name, description, created_at, updated_at \
             FROM named_steps WHERE named_step_uuid = $1",
        )
        .bind(named_step_uuid)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("find_named_step", e))?;
        Ok(row)
    }
}
