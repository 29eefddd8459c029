//! # Task Request
//!
//! The boundary DTO a task is created from. Arrives over HTTP or is built
//! programmatically; validated before the initializer touches the database.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::errors::{TaskerError, TaskerResult};

/// Per-request execution overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequestOptions {
    /// Force steps to execute one at a time in dependency order
    #[serde(default)]
    pub sequential: bool,
}

/// A request to create and run a task
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TaskRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub namespace: String,
    #[serde(default = "TaskRequest::default_version")]
    pub version: String,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub initiator: Option<String>,
    #[serde(default)]
    pub source_system: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "TaskRequest::default_requested_at")]
    pub requested_at: NaiveDateTime,
    /// Minted when absent so every execution is traceable
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub options: Option<TaskRequestOptions>,
}

impl TaskRequest {
    fn default_version() -> String {
        "1.0.0".to_string()
    }

    fn default_requested_at() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: Self::default_version(),
            context: serde_json::Value::Null,
            initiator: None,
            source_system: None,
            reason: None,
            tags: Vec::new(),
            priority: None,
            requested_at: Self::default_requested_at(),
            correlation_id: None,
            options: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    pub fn with_source_system(mut self, source_system: impl Into<String>) -> Self {
        self.source_system = Some(source_system.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_options(mut self, options: TaskRequestOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Validate boundary constraints, surfacing the first violation
    pub fn validate_request(&self) -> TaskerResult<()> {
        self.validate()
            .map_err(|e| TaskerError::ValidationError(format!("invalid task request: {e}")))
    }

    /// The correlation id for this execution, minting one when absent
    pub fn correlation_id_or_mint(&self) -> Uuid {
        self.correlation_id.unwrap_or_else(Uuid::now_v7)
    }

    /// Whether this request demands ordered (sequential) step execution
    pub fn sequential_execution(&self) -> bool {
        self.options.as_ref().map(|o| o.sequential).unwrap_or(false)
    }
}
