//! # Database
//!
//! Connection pool construction and embedded migrations. The migrator is
//! exposed for `#[sqlx::test(migrator = "tasker_shared::database::MIGRATOR")]`
//! in crate and workspace tests.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::{DatabaseConfig, TaskerConfig};
use crate::errors::{TaskerError, TaskerResult};

/// Embedded migrations for the engine tables
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Build a connection pool from configuration
pub async fn connect(config: &DatabaseConfig) -> TaskerResult<PgPool> {
    let url = config.effective_url()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .connect(&url)
        .await
        .map_err(|e| TaskerError::database("connect", e))?;

    info!(pool_size = config.pool_size, "Database pool established");
    Ok(pool)
}

/// Build the pool the engine tables live on. When the secondary database is
/// enabled, its connection URL comes from `<NAME>_DATABASE_URL` (name
/// upcased); otherwise the primary settings apply.
pub async fn connect_engine(config: &TaskerConfig) -> TaskerResult<PgPool> {
    if config.secondary_database.enabled {
        let name = config.secondary_database.name.as_deref().ok_or_else(|| {
            TaskerError::ConfigurationError(
                "secondary_database.enabled requires secondary_database.name".to_string(),
            )
        })?;
        let env_var = format!("{}_DATABASE_URL", name.to_uppercase());
        let url = std::env::var(&env_var).map_err(|_| {
            TaskerError::ConfigurationError(format!(
                "secondary database '{name}' enabled but {env_var} is not set"
            ))
        })?;

        let secondary = DatabaseConfig {
            url: Some(url),
            ..config.database.clone()
        };
        // Bypass the DATABASE_URL override; the secondary URL was explicit
        let pool = PgPoolOptions::new()
            .max_connections(secondary.pool_size)
            .acquire_timeout(Duration::from_secs(secondary.connect_timeout_seconds))
            .connect(secondary.url.as_deref().unwrap_or_default())
            .await
            .map_err(|e| TaskerError::database("connect_secondary", e))?;
        info!(database = name, "Secondary database pool established");
        return Ok(pool);
    }
    connect(&config.database).await
}

/// Run pending migrations against the pool
pub async fn migrate(pool: &PgPool) -> TaskerResult<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| TaskerError::database("migrate", e))?;
    Ok(())
}
