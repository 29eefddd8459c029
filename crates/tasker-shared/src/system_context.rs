//! # System Context
//!
//! The process-wide component bundle: database pool, configuration, event
//! publisher, backoff calculator, and identity strategy. Built once at
//! startup and injected into orchestration components as `Arc<SystemContext>`
//! rather than reached for as ambient state.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::TaskerConfig;
use crate::database;
use crate::errors::TaskerResult;
use crate::events::EventPublisher;
use crate::identity::IdentityStrategy;
use crate::models::orchestration::BackoffCalculator;

#[derive(Debug, Clone)]
pub struct SystemContext {
    pool: PgPool,
    config: Arc<TaskerConfig>,
    event_publisher: Arc<EventPublisher>,
    backoff: BackoffCalculator,
    identity: IdentityStrategy,
}

impl SystemContext {
    /// Load configuration, connect, and run migrations
    pub async fn bootstrap() -> TaskerResult<SystemContext> {
        let config = TaskerConfig::load()?;
        let pool = database::connect_engine(&config).await?;
        database::migrate(&pool).await?;
        Self::with_pool_and_config(pool, config)
    }

    /// Build a context over an existing pool with default configuration.
    /// The entry point for tests.
    pub async fn with_pool(pool: PgPool) -> TaskerResult<SystemContext> {
        Self::with_pool_and_config(pool, TaskerConfig::default())
    }

    pub fn with_pool_and_config(pool: PgPool, config: TaskerConfig) -> TaskerResult<SystemContext> {
        let event_publisher = Arc::new(EventPublisher::new());
        for dir in &config.events.custom_events_directories {
            event_publisher.registry().register_custom_events_from_dir(dir)?;
        }

        let backoff = BackoffCalculator::new(config.backoff.max_backoff_seconds);
        let identity = IdentityStrategy::from_config(&config.execution.identity_strategy)?;

        Ok(SystemContext {
            pool,
            config: Arc::new(config),
            event_publisher,
            backoff,
            identity,
        })
    }

    /// Swap in a custom identity function (the `custom` strategy)
    pub fn with_identity_strategy(mut self, identity: IdentityStrategy) -> SystemContext {
        self.identity = identity;
        self
    }

    pub fn database_pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &TaskerConfig {
        &self.config
    }

    pub fn event_publisher(&self) -> &Arc<EventPublisher> {
        &self.event_publisher
    }

    pub fn backoff(&self) -> &BackoffCalculator {
        &self.backoff
    }

    pub fn identity_strategy(&self) -> &IdentityStrategy {
        &self.identity
    }

    pub fn max_concurrent_steps(&self) -> usize {
        self.config.execution.max_concurrent_steps
    }
}
