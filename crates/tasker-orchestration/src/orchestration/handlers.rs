//! # Step Handlers
//!
//! The handler contract and its registry. A handler receives the task
//! context, its step's inputs, and the results of completed predecessors, and
//! returns a results map or a typed failure. Handler existence is checked at
//! registration time, never at first execution.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use tasker_shared::{TaskerError, TaskerResult};

/// Everything a handler may read for one execution
#[derive(Debug, Clone)]
pub struct StepExecutionScope {
    pub task_uuid: Uuid,
    pub workflow_step_uuid: Uuid,
    pub step_name: String,
    pub task_context: Value,
    pub step_inputs: Value,
    /// Results of completed predecessor steps, keyed by step name
    pub previous_results: HashMap<String, Value>,
}

/// Failure taxonomy a handler may surface.
///
/// Anything transient belongs in `Retryable`; the readiness projection will
/// schedule the retry under the backoff rules. `Permanent` marks the step
/// terminally failed regardless of remaining attempts. Timeout-shaped errors
/// should set an error class matching `Timeout` so metrics can categorize.
#[derive(Debug, Clone, Error)]
pub enum StepHandlerError {
    #[error("retryable step failure: {message}")]
    Retryable {
        message: String,
        /// Server-requested backoff; populates `backoff_request_seconds`
        retry_after_seconds: Option<i32>,
        error_class: String,
        context: Option<Value>,
    },
    #[error("permanent step failure: {message}")]
    Permanent {
        message: String,
        error_code: Option<String>,
        error_class: String,
        context: Option<Value>,
    },
}

impl StepHandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        StepHandlerError::Retryable {
            message: message.into(),
            retry_after_seconds: None,
            error_class: "RetryableError".to_string(),
            context: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StepHandlerError::Permanent {
            message: message.into(),
            error_code: None,
            error_class: "PermanentError".to_string(),
            context: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: i32) -> Self {
        if let StepHandlerError::Retryable {
            retry_after_seconds,
            ..
        } = &mut self
        {
            *retry_after_seconds = Some(seconds);
        }
        self
    }

    pub fn with_error_class(mut self, class: impl Into<String>) -> Self {
        match &mut self {
            StepHandlerError::Retryable { error_class, .. }
            | StepHandlerError::Permanent { error_class, .. } => *error_class = class.into(),
        }
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        if let StepHandlerError::Permanent { error_code, .. } = &mut self {
            *error_code = Some(code.into());
        }
        self
    }

    pub fn message(&self) -> &str {
        match self {
            StepHandlerError::Retryable { message, .. }
            | StepHandlerError::Permanent { message, .. } => message,
        }
    }

    pub fn error_class(&self) -> &str {
        match self {
            StepHandlerError::Retryable { error_class, .. }
            | StepHandlerError::Permanent { error_class, .. } => error_class,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, StepHandlerError::Permanent { .. })
    }

    pub fn retry_after_seconds(&self) -> Option<i32> {
        match self {
            StepHandlerError::Retryable {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            StepHandlerError::Permanent { .. } => None,
        }
    }
}

/// A step's executable body
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn call(&self, scope: StepExecutionScope) -> Result<Value, StepHandlerError>;
}

/// Explicit registration of handler callables by name
pub struct StepHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn StepHandler>>>,
}

impl fmt::Debug for StepHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len();
        f.debug_struct("StepHandlerRegistry")
            .field("handler_count", &count)
            .finish()
    }
}

impl Default for StepHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StepHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.into(), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(name)
    }

    /// Resolve a handler; a missing handler is a configuration error
    pub fn resolve(&self, name: &str) -> TaskerResult<Arc<dyn StepHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| {
                TaskerError::ConfigurationError(format!("no step handler registered as '{name}'"))
            })
    }

    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
