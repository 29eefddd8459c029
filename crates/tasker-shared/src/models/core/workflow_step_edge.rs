//! # Workflow Step Edge
//!
//! Directed edge from a producer step to a consumer step. The edge set of a
//! task must stay acyclic; inserts that would make a step reachable from
//! itself are rejected before anything persists.

use chrono::NaiveDateTime;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};

pub const DEFAULT_EDGE_NAME: &str = "provides";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkflowStepEdge {
    pub workflow_step_edge_uuid: Uuid,
    pub from_step_uuid: Uuid,
    pub to_step_uuid: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl WorkflowStepEdge {
    /// Insert an edge after validating it cannot close a cycle
    pub async fn create(
        pool: &PgPool,
        from_step_uuid: Uuid,
        to_step_uuid: Uuid,
        name: &str,
    ) -> TaskerResult<WorkflowStepEdge> {
        if from_step_uuid == to_step_uuid {
            return Err(TaskerError::ValidationError(
                "edge cannot connect a step to itself".to_string(),
            ));
        }

        if Self::would_create_cycle(pool, from_step_uuid, to_step_uuid).await? {
            return Err(TaskerError::ValidationError(format!(
                "edge {from_step_uuid} -> {to_step_uuid} would introduce a cycle"
            )));
        }

        let row = sqlx::query_as::<_, WorkflowStepEdge>(
            "INSERT INTO workflow_step_edges (workflow_step_edge_uuid, from_step_uuid, \
                to_step_uuid, name) \
             VALUES ($1, $2, $3, $4) \
             RETURNING workflow_step_edge_uuid, from_step_uuid, to_step_uuid, name, \
                created_at, updated_at",
        )
        .bind(Uuid::now_v7())
        .bind(from_step_uuid)
        .bind(to_step_uuid)
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| TaskerError::database("create_edge", e))?;
        Ok(row)
    }

    /// True when `from` is already reachable from `to`, meaning the new edge
    /// would close a loop
    pub async fn would_create_cycle(
        pool: &PgPool,
        from_step_uuid: Uuid,
        to_step_uuid: Uuid,
    ) -> TaskerResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "WITH RECURSIVE reachable AS ( \
                 SELECT to_step_uuid FROM workflow_step_edges WHERE from_step_uuid = $1 \
                 UNION \
                 SELECT e.to_step_uuid FROM workflow_step_edges e \
                 JOIN reachable r ON e.from_step_uuid = r.to_step_uuid \
             ) \
             SELECT EXISTS (SELECT 1 FROM reachable WHERE to_step_uuid = $2)",
        )
        .bind(to_step_uuid)
        .bind(from_step_uuid)
        .fetch_one(pool)
        .await
        .map_err(|e| TaskerError::database("cycle_check", e))?;
        Ok(exists)
    }

    /// All edges whose endpoints belong to the given task
    pub async fn list_by_task(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<Vec<WorkflowStepEdge>> {
        let rows = sqlx::query_as::<_, WorkflowStepEdge>(
            "SELECT e.workflow_step_edge_uuid, e.from_step_uuid, e.to_step_uuid, e.name, \
                    e.created_at, e.updated_at \
             FROM workflow_step_edges e \
             JOIN workflow_steps ws ON ws.workflow_step_uuid = e.from_step_uuid \
             WHERE ws.task_uuid = $1 \
             ORDER BY e.workflow_step_edge_uuid",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await
        .map_err(|e| TaskerError::database("list_edges", e))?;
        Ok(rows)
    }

    /// Producer steps feeding the given step
    pub async fn parents_of(pool: &PgPool, workflow_step_uuid: Uuid) -> TaskerResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT from_step_uuid FROM workflow_step_edges WHERE to_step_uuid = $1 \
             ORDER BY from_step_uuid",
        )
        .bind(workflow_step_uuid)
        .fetch_all(pool)
        .await
        .map_err(|e| TaskerError::database("parents_of", e))?;
        Ok(rows.into_iter().map(|(uuid,)| uuid).collect())
    }
}
