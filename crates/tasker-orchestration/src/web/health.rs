//! Health and metrics endpoints. Liveness never touches the database;
//! readiness is a connectivity probe with a timeout; the detailed status
//! surface is optionally authenticated.

use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::error;

use super::{authorize, ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/health/status", get(status))
        .route("/metrics", get(metrics))
}

/// Lightweight connectivity probe
async fn check_database(pool: &PgPool, timeout: Duration) -> Result<(), String> {
    let probe = sqlx::query("SELECT 1").execute(pool);
    match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("health check timed out after {timeout:?}")),
    }
}

async fn live() -> Json<Value> {
    Json(json!({"status": "alive"}))
}

async fn ready(State(system): State<AppState>) -> Result<Json<Value>, ApiError> {
    let timeout = Duration::from_millis(system.context().config().health.check_timeout_ms);
    match check_database(system.context().database_pool(), timeout).await {
        Ok(()) => Ok(Json(json!({"status": "ready"}))),
        Err(message) => {
            error!(error = %message, "Readiness check failed");
            Err(ApiError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                error: "not_ready".to_string(),
                message,
            })
        }
    }
}

async fn status(
    State(system): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let config = system.context().config();
    if config.health.status_requires_authentication {
        authorize(&headers, config.web.api_token.as_deref())?;
    }

    let pool = system.context().database_pool();
    let timeout = Duration::from_millis(config.health.check_timeout_ms);
    let database_ok = check_database(pool, timeout).await;

    let queue_depth = system.reenqueuer().queue_depth().await.unwrap_or(-1);
    let task_counts: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE complete) FROM tasks",
    )
    .fetch_one(pool)
    .await
    .unwrap_or((-1, -1));

    Ok(Json(json!({
        "status": if database_ok.is_ok() { "healthy" } else { "degraded" },
        "database": {
            "connected": database_ok.is_ok(),
            "error": database_ok.err(),
            "pool_size": pool.size(),
            "idle_connections": pool.num_idle(),
        },
        "run_queue_depth": queue_depth,
        "tasks": {
            "total": task_counts.0,
            "complete": task_counts.1,
        },
    })))
}

async fn metrics(
    State(system): State<AppState>,
    headers: HeaderMap,
) -> Result<String, ApiError> {
    let config = system.context().config();
    if !config.web.metrics_enabled {
        return Err(ApiError::not_found("metrics are disabled"));
    }
    if config.web.metrics_auth_required {
        authorize(&headers, config.web.api_token.as_deref())?;
    }
    Ok(system.metrics().render_prometheus())
}
