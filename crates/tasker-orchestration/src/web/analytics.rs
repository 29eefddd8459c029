//! Analytics endpoints. Internal calculation failures degrade to default
//! values rather than surfacing 500s; the caller always gets a well-formed
//! body.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::warn;

use super::{authorize, ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analytics/performance", get(performance))
        .route("/analytics/bottlenecks", get(bottlenecks))
}

fn authorize_analytics(system: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let config = system.context().config();
    if config.web.metrics_auth_required {
        authorize(headers, config.web.api_token.as_deref())?;
    }
    Ok(())
}

#[derive(Debug, sqlx::FromRow, Default)]
struct PerformanceRow {
    total_tasks: i64,
    complete_tasks: i64,
    total_steps: i64,
    completed_steps: i64,
    failed_steps: i64,
    avg_step_duration_seconds: Option<f64>,
}

async fn load_performance(pool: &PgPool) -> Result<PerformanceRow, sqlx::Error> {
    sqlx::query_as(
        "SELECT \
            (SELECT COUNT(*) FROM tasks) AS total_tasks, \
            (SELECT COUNT(*) FROM tasks WHERE complete) AS complete_tasks, \
            (SELECT COUNT(*) FROM workflow_steps) AS total_steps, \
            (SELECT COUNT(*) FROM workflow_steps WHERE processed) AS completed_steps, \
            (SELECT COUNT(*) FROM workflow_step_transitions t \
             WHERE t.most_recent AND t.to_state = 'failed') AS failed_steps, \
            (SELECT AVG(EXTRACT(EPOCH FROM (processed_at - last_attempted_at)))::float8 \
             FROM workflow_steps \
             WHERE processed AND processed_at IS NOT NULL AND last_attempted_at IS NOT NULL) \
                AS avg_step_duration_seconds",
    )
    .fetch_one(pool)
    .await
}

async fn performance(
    State(system): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize_analytics(&system, &headers)?;

    let row = match load_performance(system.context().database_pool()).await {
        Ok(row) => row,
        Err(e) => {
            warn!(error = %e, "Performance analytics degraded to defaults");
            PerformanceRow::default()
        }
    };

    let completion_rate = if row.total_tasks > 0 {
        100.0 * row.complete_tasks as f64 / row.total_tasks as f64
    } else {
        0.0
    };

    Ok(Json(json!({
        "total_tasks": row.total_tasks,
        "complete_tasks": row.complete_tasks,
        "task_completion_rate": completion_rate,
        "total_steps": row.total_steps,
        "completed_steps": row.completed_steps,
        "failed_steps": row.failed_steps,
        "avg_step_duration_seconds": row.avg_step_duration_seconds.unwrap_or(0.0),
    })))
}

#[derive(Debug, Deserialize)]
struct BottlenecksQuery {
    namespace: Option<String>,
    name: Option<String>,
    version: Option<String>,
    /// Look-back window in hours
    period: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct BottleneckRow {
    step_name: String,
    executions: i64,
    avg_duration_seconds: Option<f64>,
    max_duration_seconds: Option<f64>,
}

async fn load_bottlenecks(
    pool: &PgPool,
    query: &BottlenecksQuery,
) -> Result<Vec<BottleneckRow>, sqlx::Error> {
    let period_hours = query.period.unwrap_or(24).clamp(1, 24 * 30) as i32;
    sqlx::query_as(
        "SELECT ns.name AS step_name, \
                COUNT(*) AS executions, \
                AVG(EXTRACT(EPOCH FROM (ws.processed_at - ws.last_attempted_at)))::float8 \
                    AS avg_duration_seconds, \
                MAX(EXTRACT(EPOCH FROM (ws.processed_at - ws.last_attempted_at)))::float8 \
                    AS max_duration_seconds \
         FROM workflow_steps ws \
         JOIN named_steps ns ON ns.named_step_uuid = ws.named_step_uuid \
         JOIN tasks t ON t.task_uuid = ws.task_uuid \
         JOIN named_tasks nt ON nt.named_task_uuid = t.named_task_uuid \
         JOIN task_namespaces tns ON tns.task_namespace_uuid = nt.task_namespace_uuid \
         WHERE ws.processed \
           AND ws.processed_at >= NOW() - make_interval(hours => $1) \
           AND ($2::varchar IS NULL OR tns.name = $2) \
           AND ($3::varchar IS NULL OR nt.name = $3) \
           AND ($4::varchar IS NULL OR nt.version = $4) \
         GROUP BY ns.name \
         ORDER BY avg_duration_seconds DESC NULLS LAST \
         LIMIT 10",
    )
    .bind(period_hours)
    .bind(&query.namespace)
    .bind(&query.name)
    .bind(&query.version)
    .fetch_all(pool)
    .await
}

async fn bottlenecks(
    State(system): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BottlenecksQuery>,
) -> Result<Json<Value>, ApiError> {
    authorize_analytics(&system, &headers)?;

    let rows = match load_bottlenecks(system.context().database_pool(), &query).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "Bottleneck analytics degraded to defaults");
            Vec::new()
        }
    };

    Ok(Json(json!({
        "period_hours": query.period.unwrap_or(24),
        "bottlenecks": rows.iter().map(|r| json!({
            "step_name": r.step_name,
            "executions": r.executions,
            "avg_duration_seconds": r.avg_duration_seconds.unwrap_or(0.0),
            "max_duration_seconds": r.max_duration_seconds.unwrap_or(0.0),
        })).collect::<Vec<_>>(),
    })))
}
