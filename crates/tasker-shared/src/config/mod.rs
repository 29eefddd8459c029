//! # Configuration
//!
//! Configuration types for the orchestration system, loaded from
//! `config/tasker/base/tasker.toml` with environment-specific overrides in
//! `config/tasker/environments/{env}/tasker.toml` and `TASKER_`-prefixed
//! environment variables. The environment is selected by `TASKER_ENV`
//! (default `development`).
//!
//! ## Example
//!
//! ```toml
//! [execution]
//! max_concurrent_steps = 3
//!
//! [web]
//! enabled = true
//! host = "0.0.0.0"
//! port = 3000
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{TaskerError, TaskerResult};

/// Root configuration for the Tasker system
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub secondary_database: SecondaryDatabaseConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub reenqueue: ReenqueueDelaysConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl TaskerConfig {
    /// Load configuration for the environment named by `TASKER_ENV`.
    ///
    /// Missing files fall through to defaults; a present-but-invalid file is
    /// a configuration error (fail fast at startup).
    pub fn load() -> TaskerResult<Self> {
        let environment =
            std::env::var("TASKER_ENV").unwrap_or_else(|_| "development".to_string());
        Self::load_for_environment(&environment)
    }

    /// Load configuration for an explicit environment name
    pub fn load_for_environment(environment: &str) -> TaskerResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/tasker/base/tasker").required(false))
            .add_source(
                config::File::with_name(&format!(
                    "config/tasker/environments/{environment}/tasker"
                ))
                .required(false),
            )
            .add_source(config::Environment::with_prefix("TASKER").separator("__"));

        let loaded = builder
            .build()
            .map_err(|e| TaskerError::ConfigurationError(format!("config load failed: {e}")))?;

        loaded
            .try_deserialize()
            .map_err(|e| TaskerError::ConfigurationError(format!("config parse failed: {e}")))
    }

    /// Check if the web API is enabled
    pub fn web_enabled(&self) -> bool {
        self.web.enabled
    }
}

/// Primary database connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; `DATABASE_URL` wins when set
    pub url: Option<String>,
    pub pool_size: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 10,
            connect_timeout_seconds: 10,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the effective connection URL (environment beats config)
    pub fn effective_url(&self) -> TaskerResult<String> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return Ok(url);
        }
        self.url.clone().ok_or_else(|| {
            TaskerError::ConfigurationError(
                "no database URL configured (set DATABASE_URL or database.url)".to_string(),
            )
        })
    }
}

/// Optional secondary database for routing engine tables separately
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SecondaryDatabaseConfig {
    #[serde(default)]
    pub enabled: bool,
    pub name: Option<String>,
}

/// Execution behavior for the step executor and orchestrator loop
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Bound on per-iteration step parallelism. Kept small to avoid
    /// database-connection exhaustion.
    pub max_concurrent_steps: usize,
    pub environment: String,
    /// Identity strategy for task deduplication: default | hash | custom
    pub identity_strategy: String,
    pub shutdown_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 3,
            environment: "development".to_string(),
            identity_strategy: "default".to_string(),
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// Retry backoff timing for failed steps
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Cap on exponential backoff (seconds)
    pub max_backoff_seconds: i64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_backoff_seconds: 30,
        }
    }
}

/// Delay classes applied when the finalizer re-enqueues a task
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReenqueueDelaysConfig {
    /// Task has ready steps: pick it up again immediately
    pub has_ready_steps_seconds: i64,
    /// Steps in flight: small delay to let them land
    pub processing_seconds: i64,
    /// Nothing ready yet: medium delay
    pub waiting_for_dependencies_seconds: i64,
}

impl Default for ReenqueueDelaysConfig {
    fn default() -> Self {
        Self {
            has_ready_steps_seconds: 0,
            processing_seconds: 5,
            waiting_for_dependencies_seconds: 30,
        }
    }
}

/// Web API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Gate for the /metrics endpoint
    pub metrics_enabled: bool,
    /// Require bearer auth on metrics and analytics endpoints
    pub metrics_auth_required: bool,
    /// Static bearer token for the authenticated endpoints
    pub api_token: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 3000,
            metrics_enabled: true,
            metrics_auth_required: false,
            api_token: None,
        }
    }
}

/// Health endpoint behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Require bearer auth on /health/status
    pub status_requires_authentication: bool,
    pub check_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            status_requires_authentication: false,
            check_timeout_ms: 1000,
        }
    }
}

/// Event system settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Directories scanned at startup for developer-defined event
    /// registrations (TOML files of custom event names)
    #[serde(default)]
    pub custom_events_directories: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = TaskerConfig::default();
        assert_eq!(config.execution.max_concurrent_steps, 3);
        assert_eq!(config.execution.identity_strategy, "default");
        assert_eq!(config.backoff.max_backoff_seconds, 30);
        assert_eq!(config.reenqueue.has_ready_steps_seconds, 0);
        assert_eq!(config.reenqueue.processing_seconds, 5);
        assert_eq!(config.reenqueue.waiting_for_dependencies_seconds, 30);
        assert!(config.web_enabled());
        assert!(!config.health.status_requires_authentication);
    }

    #[test]
    fn test_database_config_requires_url() {
        let config = DatabaseConfig {
            url: None,
            ..Default::default()
        };
        // Only assert the failure case when the environment doesn't provide one
        if std::env::var("DATABASE_URL").is_err() {
            assert!(config.effective_url().is_err());
        }

        let config = DatabaseConfig {
            url: Some("postgres://localhost/tasker_test".to_string()),
            ..Default::default()
        };
        if std::env::var("DATABASE_URL").is_err() {
            assert_eq!(
                config.effective_url().unwrap(),
                "postgres://localhost/tasker_test"
            );
        }
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = TaskerConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: TaskerConfig = toml::from_str(&toml).unwrap();
        assert_eq!(
            parsed.execution.max_concurrent_steps,
            config.execution.max_concurrent_steps
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: TaskerConfig = toml::from_str(
            r#"
            [execution]
            max_concurrent_steps = 5
            "#,
        )
        .unwrap();
        assert_eq!(parsed.execution.max_concurrent_steps, 5);
        // Untouched sections keep their defaults
        assert_eq!(parsed.backoff.max_backoff_seconds, 30);
        assert_eq!(parsed.web.port, 3000);
    }
}
