//! Workflow step endpoints: list per task, show, patch (retry_limit/inputs),
//! cancel.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use tasker_shared::models::WorkflowStep;

use super::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks/{task_uuid}/workflow_steps", get(list_steps))
        .route(
            "/tasks/{task_uuid}/workflow_steps/{step_uuid}",
            get(get_step).patch(update_step).delete(cancel_step),
        )
}

fn step_json(step: &WorkflowStep, current_state: Option<&str>) -> Value {
    json!({
        "workflow_step_uuid": step.workflow_step_uuid,
        "task_uuid": step.task_uuid,
        "named_step_uuid": step.named_step_uuid,
        "current_state": current_state.unwrap_or("pending"),
        "retryable": step.retryable,
        "retry_limit": step.retry_limit,
        "skippable": step.skippable,
        "attempts": step.attempts,
        "in_process": step.in_process,
        "processed": step.processed,
        "processed_at": step.processed_at,
        "last_attempted_at": step.last_attempted_at,
        "backoff_request_seconds": step.backoff_request_seconds,
        "inputs": step.inputs,
        "results": step.results,
    })
}

async fn list_steps(
    State(system): State<AppState>,
    Path(task_uuid): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let pool = system.context().database_pool();
    let steps = WorkflowStep::list_by_task(pool, task_uuid).await?;
    if steps.is_empty()
        && tasker_shared::models::Task::find_by_id(pool, task_uuid)
            .await?
            .is_none()
    {
        return Err(ApiError::not_found(format!("no task {task_uuid}")));
    }

    let mut rows = Vec::with_capacity(steps.len());
    for step in &steps {
        let state = step.get_current_state(pool).await?;
        rows.push(step_json(step, state.as_deref()));
    }
    Ok(Json(json!({"workflow_steps": rows})))
}

async fn load_step_in_task(
    system: &AppState,
    task_uuid: Uuid,
    step_uuid: Uuid,
) -> Result<WorkflowStep, ApiError> {
    let pool = system.context().database_pool();
    let step = WorkflowStep::find_by_id(pool, step_uuid)
        .await?
        .filter(|s| s.task_uuid == task_uuid)
        .ok_or_else(|| {
            ApiError::not_found(format!("no workflow step {step_uuid} in task {task_uuid}"))
        })?;
    Ok(step)
}

async fn get_step(
    State(system): State<AppState>,
    Path((task_uuid, step_uuid)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, ApiError> {
    let step = load_step_in_task(&system, task_uuid, step_uuid).await?;
    let state = step
        .get_current_state(system.context().database_pool())
        .await?;
    Ok(Json(step_json(&step, state.as_deref())))
}

/// Only `retry_limit` and `inputs` are caller-mutable
#[derive(Debug, Deserialize)]
struct UpdateStepBody {
    retry_limit: Option<i32>,
    inputs: Option<Value>,
}

async fn update_step(
    State(system): State<AppState>,
    Path((task_uuid, step_uuid)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateStepBody>,
) -> Result<Json<Value>, ApiError> {
    if let Some(retry_limit) = body.retry_limit {
        if retry_limit < 0 {
            return Err(ApiError::bad_request(format!(
                "retry_limit must be non-negative, got {retry_limit}"
            )));
        }
    }

    // Ensure the step belongs to the addressed task before mutating
    load_step_in_task(&system, task_uuid, step_uuid).await?;

    let pool = system.context().database_pool();
    let updated = WorkflowStep::update_mutable(pool, step_uuid, body.retry_limit, body.inputs)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no workflow step {step_uuid}")))?;

    let state = updated.get_current_state(pool).await?;
    Ok(Json(step_json(&updated, state.as_deref())))
}

async fn cancel_step(
    State(system): State<AppState>,
    Path((task_uuid, step_uuid)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, ApiError> {
    load_step_in_task(&system, task_uuid, step_uuid).await?;
    system.cancel_step(step_uuid).await?;
    Ok(Json(
        json!({"workflow_step_uuid": step_uuid, "cancelled": true}),
    ))
}
