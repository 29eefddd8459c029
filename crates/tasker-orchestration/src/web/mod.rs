//! # Web API
//!
//! Thin axum adapters over the orchestration core. Handlers validate at the
//! boundary, call one core operation, and map errors to the standard
//! envelope; no orchestration logic lives here.

pub mod analytics;
pub mod handlers_api;
pub mod health;
pub mod tasks;
pub mod workflow_steps;

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use tasker_shared::models::Task;
use tasker_shared::TaskerError;

use crate::orchestration::OrchestrationSystem;

/// Shared state for every route
pub type AppState = Arc<OrchestrationSystem>;

/// Build the full application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(tasks::router())
        .merge(workflow_steps::router())
        .merge(handlers_api::router())
        .merge(health::router())
        .merge(analytics::router())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// The error envelope every endpoint returns on failure
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: "not_found".to_string(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "validation_error".to_string(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: "unauthorized".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error,
            "message": self.message,
            "timestamp": chrono::Utc::now().naive_utc(),
        }));
        (self.status, body).into_response()
    }
}

impl From<TaskerError> for ApiError {
    fn from(err: TaskerError) -> Self {
        let (status, error) = match &err {
            TaskerError::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            TaskerError::GuardFailed { .. } | TaskerError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "conflict")
            }
            TaskerError::ConfigurationError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        Self {
            status,
            error: error.to_string(),
            message: err.to_string(),
        }
    }
}

/// Pagination query parameters shared by the listing endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

impl PageQuery {
    /// Effective limit; out-of-range values are a validation error
    pub fn limit(&self) -> Result<i64, ApiError> {
        match self.limit {
            None => Ok(DEFAULT_PAGE_LIMIT),
            Some(limit) if (1..=MAX_PAGE_LIMIT).contains(&limit) => Ok(limit),
            Some(limit) => Err(ApiError::bad_request(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}, got {limit}"
            ))),
        }
    }

    pub fn offset(&self) -> Result<i64, ApiError> {
        match self.offset {
            None => Ok(0),
            Some(offset) if offset >= 0 => Ok(offset),
            Some(offset) => Err(ApiError::bad_request(format!(
                "offset must be non-negative, got {offset}"
            ))),
        }
    }

    /// Sort column validated against the model; invalid values fall back
    pub fn sort_by(&self) -> &str {
        match self.sort_by.as_deref() {
            Some(column) if Task::SORTABLE_COLUMNS.contains(&column) => column,
            _ => "created_at",
        }
    }

    /// Invalid sort orders fall back to ascending
    pub fn descending(&self) -> bool {
        matches!(self.sort_order.as_deref(), Some("desc"))
    }
}

/// Bearer-token check for the authenticated endpoints
pub fn authorize(headers: &HeaderMap, expected_token: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected_token else {
        return Err(ApiError::unauthorized(
            "authentication required but no api token is configured",
        ));
    };

    let supplied = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match supplied {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(ApiError {
            status: StatusCode::FORBIDDEN,
            error: "forbidden".to_string(),
            message: "invalid token".to_string(),
        }),
        None => Err(ApiError::unauthorized("missing bearer token")),
    }
}
