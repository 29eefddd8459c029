//! Task endpoints: list, create, show, patch (reason/tags), cancel.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use tasker_shared::models::core::task_request::TaskRequest;
use tasker_shared::models::Task;

use super::{ApiError, AppState, PageQuery};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/{task_uuid}",
            get(get_task).patch(update_task).delete(cancel_task),
        )
}

fn task_json(task: &Task, current_status: Option<&str>) -> Value {
    json!({
        "task_uuid": task.task_uuid,
        "named_task_uuid": task.named_task_uuid,
        "complete": task.complete,
        "current_status": current_status.unwrap_or("pending"),
        "requested_at": task.requested_at,
        "initiator": task.initiator,
        "source_system": task.source_system,
        "reason": task.reason,
        "tags": task.tags,
        "context": task.context,
        "priority": task.priority,
        "correlation_id": task.correlation_id,
        "created_at": task.created_at,
        "updated_at": task.updated_at,
    })
}

async fn list_tasks(
    State(system): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = page.limit()?;
    let offset = page.offset()?;
    let pool = system.context().database_pool();

    let tasks = Task::list(pool, limit, offset, page.sort_by(), page.descending()).await?;

    let mut rows = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let status = task.get_current_state(pool).await?;
        rows.push(task_json(task, status.as_deref()));
    }

    Ok(Json(json!({
        "tasks": rows,
        "limit": limit,
        "offset": offset,
    })))
}

async fn create_task(
    State(system): State<AppState>,
    Json(request): Json<TaskRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let result = system.submit_task_request(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "task_uuid": result.task_uuid,
            "step_count": result.step_count,
        })),
    ))
}

async fn get_task(
    State(system): State<AppState>,
    Path(task_uuid): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let pool = system.context().database_pool();
    let task = Task::find_by_id(pool, task_uuid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no task {task_uuid}")))?;

    let status = task.get_current_state(pool).await?;
    let execution_context = system.discovery().get_execution_context(task_uuid).await?;

    let mut body = task_json(&task, status.as_deref());
    body["execution_context"] = execution_context
        .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
        .unwrap_or(Value::Null);
    Ok(Json(body))
}

/// Only `reason` and `tags` are caller-mutable
#[derive(Debug, Deserialize)]
struct UpdateTaskBody {
    reason: Option<String>,
    tags: Option<Vec<String>>,
}

async fn update_task(
    State(system): State<AppState>,
    Path(task_uuid): Path<Uuid>,
    Json(body): Json<UpdateTaskBody>,
) -> Result<Json<Value>, ApiError> {
    let pool = system.context().database_pool();
    let updated = Task::update_mutable(
        pool,
        task_uuid,
        body.reason,
        body.tags.map(|t| json!(t)),
    )
    .await?
    .ok_or_else(|| ApiError::not_found(format!("no task {task_uuid}")))?;

    let status = updated.get_current_state(pool).await?;
    Ok(Json(task_json(&updated, status.as_deref())))
}

async fn cancel_task(
    State(system): State<AppState>,
    Path(task_uuid): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let cancelled = system.cancel_task(task_uuid).await?;
    if !cancelled {
        return Err(ApiError::not_found(format!("no task {task_uuid}")));
    }
    Ok(Json(json!({"task_uuid": task_uuid, "cancelled": true})))
}
