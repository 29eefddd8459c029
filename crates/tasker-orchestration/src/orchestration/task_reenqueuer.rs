//! # Task Reenqueuer
//!
//! The mechanism half of finalization: defer a task back to the run queue,
//! possibly with a delay. Enqueue is idempotent with respect to the queue;
//! a task already queued stays exactly once in the queue and the repeat call
//! is a logged no-op.

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use tasker_shared::events::names;
use tasker_shared::events::payloads::orchestration_payload;
use tasker_shared::models::Task;
use tasker_shared::{SystemContext, TaskerError, TaskerResult};

#[derive(Debug, Clone)]
pub struct TaskReenqueuer {
    context: Arc<SystemContext>,
}

impl TaskReenqueuer {
    pub fn new(context: Arc<SystemContext>) -> Self {
        Self { context }
    }

    /// Enqueue a task to run `delay_seconds` from now. Re-enqueueing a task
    /// already in the queue is a no-op.
    #[instrument(skip(self, task), fields(task_uuid = %task.task_uuid, delay_seconds))]
    pub async fn reenqueue(&self, task: &Task, delay_seconds: i64) -> TaskerResult<()> {
        self.publish(
            names::WORKFLOW_TASK_REENQUEUE_STARTED,
            task,
            json!({
                "task_id": task.task_uuid,
                "delay_seconds": delay_seconds,
            }),
        );

        let run_at = chrono::Utc::now().naive_utc() + Duration::seconds(delay_seconds.max(0));
        let result = sqlx::query(
            "INSERT INTO task_run_queue (task_uuid, run_at, priority) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (task_uuid) DO NOTHING",
        )
        .bind(task.task_uuid)
        .bind(run_at)
        .bind(task.priority)
        .execute(self.context.database_pool())
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                info!(
                    task_uuid = %task.task_uuid,
                    "Task already queued; reenqueue is a no-op"
                );
                Ok(())
            }
            Ok(_) => {
                debug!(
                    task_uuid = %task.task_uuid,
                    delay_seconds = delay_seconds,
                    "Task reenqueued"
                );
                if delay_seconds > 0 {
                    self.publish(
                        names::WORKFLOW_TASK_REENQUEUE_DELAYED,
                        task,
                        json!({
                            "task_id": task.task_uuid,
                            "delay_seconds": delay_seconds,
                            "run_at": run_at,
                        }),
                    );
                }
                Ok(())
            }
            Err(e) => {
                warn!(task_uuid = %task.task_uuid, error = %e, "Reenqueue failed");
                self.publish(
                    names::WORKFLOW_TASK_REENQUEUE_FAILED,
                    task,
                    json!({
                        "task_id": task.task_uuid,
                        "error": e.to_string(),
                    }),
                );
                Err(TaskerError::database("reenqueue", e))
            }
        }
    }

    /// Remove a task from the run queue (task-level cancel)
    pub async fn cancel(&self, task: &Task) -> TaskerResult<bool> {
        let result = sqlx::query("DELETE FROM task_run_queue WHERE task_uuid = $1")
            .bind(task.task_uuid)
            .execute(self.context.database_pool())
            .await
            .map_err(|e| TaskerError::database("cancel_reenqueue", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// Claim due tasks, highest priority first. Claimed rows leave the queue;
    /// SKIP LOCKED keeps concurrent workers from claiming the same task.
    pub async fn dequeue_ready(&self, limit: i64) -> TaskerResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "DELETE FROM task_run_queue \
             WHERE task_uuid IN ( \
                 SELECT task_uuid FROM task_run_queue \
                 WHERE run_at <= NOW() \
                 ORDER BY priority DESC, run_at ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING task_uuid",
        )
        .bind(limit)
        .fetch_all(self.context.database_pool())
        .await
        .map_err(|e| TaskerError::database("dequeue_ready", e))?;
        Ok(rows.into_iter().map(|(uuid,)| uuid).collect())
    }

    /// Queue depth, for the health surface
    pub async fn queue_depth(&self) -> TaskerResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM task_run_queue")
            .fetch_one(self.context.database_pool())
            .await
            .map_err(|e| TaskerError::database("queue_depth", e))?;
        Ok(count)
    }

    fn publish(&self, event: &str, task: &Task, context: serde_json::Value) {
        let payload = orchestration_payload(event, Some(task.correlation_id), context);
        if let Err(e) = self.context.event_publisher().publish(event, payload) {
            warn!(event = event, error = %e, "Failed to publish reenqueue event");
        }
    }
}
