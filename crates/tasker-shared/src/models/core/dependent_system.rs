//! Dependent system: the external system a named step executes against.

use chrono::NaiveDateTime;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DependentSystem {
    pub dependent_system_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DependentSystem {
    pub async fn find_or_create(
        pool: &PgPool,
        name: &str,
        description: Option<&str>,
    ) -> TaskerResult<DependentSystem> {
        let row = sqlx::query_as::<_, DependentSystem>(
            "INSERT INTO dependent_systems (dependent_system_uuid, name, description) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO UPDATE SET updated_at = NOW() \
             RETURNING dependent_system_uuid, name, description, created_at, updated_at",
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .bind(description)
        .fetch_one(pool)
        .await
        .map_err(|e| TaskerError::database("find_or_create_dependent_system", e))?;
        Ok(row)
    }

    pub async fn find_by_name(pool: &PgPool, name: &str) -> TaskerResult<Option<DependentSystem>> {
        let row = sqlx::query_as::<_, DependentSystem>(
            "SELECT dependent_system_uuid, name, description, created_at, updated_at \
             FROM dependent_systems WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("find_dependent_system", e))?;
        Ok(row)
    }
}
