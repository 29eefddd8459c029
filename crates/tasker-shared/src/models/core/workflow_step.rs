//! # Workflow Step
//!
//! A node in a task's DAG. Steps are created with their task and never added
//! later; only execution state evolves. Attempt bookkeeping and result
//! persistence live here; state itself lives in the transition history.

use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkflowStep {
    pub workflow_step_uuid: Uuid,
    pub task_uuid: Uuid,
    pub named_step_uuid: Uuid,
    pub retryable: bool,
    pub retry_limit: i32,
    pub skippable: bool,
    pub in_process: bool,
    pub processed: bool,
    pub processed_at: Option<NaiveDateTime>,
    pub attempts: i32,
    pub last_attempted_at: Option<NaiveDateTime>,
    pub backoff_request_seconds: Option<i32>,
    pub inputs: Option<Value>,
    pub results: Option<Value>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Attributes for materializing a step from its template
#[derive(Debug, Clone)]
pub struct NewWorkflowStep {
    pub task_uuid: Uuid,
    pub named_step_uuid: Uuid,
    pub retryable: bool,
    pub retry_limit: i32,
    pub skippable: bool,
    pub inputs: Option<Value>,
}

const SELECT_COLUMNS: &str = "workflow_step_uuid, task_uuid, named_step_uuid, retryable, \
     retry_limit, skippable, in_process, processed, processed_at, attempts, \
     last_attempted_at, backoff_request_seconds, inputs, results, created_at, updated_at";

impl WorkflowStep {
    pub async fn create(pool: &PgPool, new_step: NewWorkflowStep) -> TaskerResult<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStep>(&format!(
            "INSERT INTO workflow_steps (workflow_step_uuid, task_uuid, named_step_uuid, \
                retryable, retry_limit, skippable, inputs) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(new_step.task_uuid)
        .bind(new_step.named_step_uuid)
        .bind(new_step.retryable)
        .bind(new_step.retry_limit)
        .bind(new_step.skippable)
        .bind(new_step.inputs)
        .fetch_one(pool)
        .await
        .map_err(|e| TaskerError::database("create_workflow_step", e))?;
        Ok(row)
    }

    pub async fn find_by_id(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
    ) -> TaskerResult<Option<WorkflowStep>> {
        let row = sqlx::query_as::<_, WorkflowStep>(&format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_steps WHERE workflow_step_uuid = $1"
        ))
        .bind(workflow_step_uuid)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("find_workflow_step", e))?;
        Ok(row)
    }

    /// All steps of a task ordered by id (v7 ids preserve creation order)
    pub async fn list_by_task(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<Vec<WorkflowStep>> {
        let rows = sqlx::query_as::<_, WorkflowStep>(&format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_steps WHERE task_uuid = $1 \
             ORDER BY workflow_step_uuid"
        ))
        .bind(task_uuid)
        .fetch_all(pool)
        .await
        .map_err(|e| TaskerError::database("list_workflow_steps", e))?;
        Ok(rows)
    }

    /// Resolve a step within a task by its template (named step) name
    pub async fn find_step_by_name(
        pool: &PgPool,
        task_uuid: Uuid,
        name: &str,
    ) -> TaskerResult<Option<WorkflowStep>> {
        let rewritten = SELECT_COLUMNS.replace(", ", ", ws.");
        let row = sqlx::query_as::<_, WorkflowStep>(&format!(
            "SELECT ws.{rewritten} \
             FROM workflow_steps ws \
             JOIN named_steps ns ON ns.named_step_uuid = ws.named_step_uuid \
             WHERE ws.task_uuid = $1 AND ns.name = $2"
        ))
        .bind(task_uuid)
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("find_step_by_name", e))?;
        Ok(row)
    }

    /// Record the start of an execution attempt: bump the counter, stamp
    /// `last_attempted_at`, and flag the row as in-process.
    pub async fn begin_attempt(pool: &PgPool, workflow_step_uuid: Uuid) -> TaskerResult<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStep>(&format!(
            "UPDATE workflow_steps \
             SET attempts = attempts + 1, last_attempted_at = NOW(), in_process = TRUE, \
                 updated_at = NOW() \
             WHERE workflow_step_uuid = $1 \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(workflow_step_uuid)
        .fetch_one(pool)
        .await
        .map_err(|e| TaskerError::database("begin_attempt", e))?;
        Ok(row)
    }

    /// Persist success results. Always runs before the state transition so a
    /// crash in between is recoverable by replay.
    pub async fn mark_processed(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
        results: Option<Value>,
    ) -> TaskerResult<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStep>(&format!(
            "UPDATE workflow_steps \
             SET results = $2, processed = TRUE, processed_at = NOW(), in_process = FALSE, \
                 updated_at = NOW() \
             WHERE workflow_step_uuid = $1 \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(workflow_step_uuid)
        .bind(results)
        .fetch_one(pool)
        .await
        .map_err(|e| TaskerError::database("mark_processed", e))?;
        Ok(row)
    }

    /// Persist failure data. Stores the error payload into `results`, clears
    /// the in-process flag, applies any server-requested backoff, and drops
    /// retryability for permanent failures. Runs before the failed transition.
    pub async fn record_failure(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
        error_results: Value,
        backoff_request_seconds: Option<i32>,
        retryable: bool,
    ) -> TaskerResult<WorkflowStep> {
        let row = sqlx::query_as::<_, WorkflowStep>(&format!(
            "UPDATE workflow_steps \
             SET results = $2, in_process = FALSE, \
                 backoff_request_seconds = COALESCE($3, backoff_request_seconds), \
                 retryable = retryable AND $4, updated_at = NOW() \
             WHERE workflow_step_uuid = $1 \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(workflow_step_uuid)
        .bind(error_results)
        .bind(backoff_request_seconds)
        .bind(retryable)
        .fetch_one(pool)
        .await
        .map_err(|e| TaskerError::database("record_failure", e))?;
        Ok(row)
    }

    /// Update the caller-mutable attributes (retry_limit and inputs only)
    pub async fn update_mutable(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
        retry_limit: Option<i32>,
        inputs: Option<Value>,
    ) -> TaskerResult<Option<WorkflowStep>> {
        let row = sqlx::query_as::<_, WorkflowStep>(&format!(
            "UPDATE workflow_steps \
             SET retry_limit = COALESCE($2, retry_limit), inputs = COALESCE($3, inputs), \
                 updated_at = NOW() \
             WHERE workflow_step_uuid = $1 \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(workflow_step_uuid)
        .bind(retry_limit)
        .bind(inputs)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("update_workflow_step", e))?;
        Ok(row)
    }

    /// Current state per the latest transition row; `pending` is implied when
    /// no transition exists yet
    pub async fn get_current_state(&self, pool: &PgPool) -> TaskerResult<Option<String>> {
        let state: Option<(String,)> = sqlx::query_as(
            "SELECT to_state FROM workflow_step_transitions \
             WHERE workflow_step_uuid = $1 AND most_recent",
        )
        .bind(self.workflow_step_uuid)
        .fetch_optional(pool)
        .await
        .map_err(|e| TaskerError::database("get_step_state", e))?;
        Ok(state.map(|(s,)| s))
    }
}
