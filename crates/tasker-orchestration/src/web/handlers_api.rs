//! Handler discovery endpoints: registered namespaces, the templates inside
//! a namespace, and an individual template by name and version.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use tasker_shared::registry::TaskTemplate;

use super::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/handlers", get(list_namespaces))
        .route("/handlers/{namespace}", get(list_templates))
        .route("/handlers/{namespace}/{name}", get(get_template))
}

fn template_json(template: &TaskTemplate) -> Value {
    json!({
        "namespace": template.namespace,
        "name": template.name,
        "version": template.version,
        "description": template.description,
        "sequential": template.sequential,
        "step_count": template.steps.len(),
        "steps": template.steps.iter().map(|s| json!({
            "name": s.name,
            "handler": s.handler,
            "depends_on": s.depends_on,
            "retryable": s.retryable,
            "retry_limit": s.retry_limit,
            "skippable": s.skippable,
        })).collect::<Vec<_>>(),
    })
}

async fn list_namespaces(State(system): State<AppState>) -> Json<Value> {
    Json(json!({
        "namespaces": system.template_registry().namespaces(),
    }))
}

async fn list_templates(
    State(system): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let templates = system.template_registry().templates_in_namespace(&namespace);
    if templates.is_empty() {
        return Err(ApiError::not_found(format!(
            "no handlers registered in namespace '{namespace}'"
        )));
    }
    Ok(Json(json!({
        "namespace": namespace,
        "handlers": templates.iter().map(template_json).collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
struct VersionQuery {
    version: Option<String>,
}

async fn get_template(
    State(system): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<Value>, ApiError> {
    let version = query.version.unwrap_or_else(|| "1.0.0".to_string());
    let template = system
        .template_registry()
        .get_task_template(&namespace, &name, &version)
        .map_err(|_| {
            ApiError::not_found(format!("no handler {namespace}/{name}/{version}"))
        })?;
    Ok(Json(template_json(&template)))
}
