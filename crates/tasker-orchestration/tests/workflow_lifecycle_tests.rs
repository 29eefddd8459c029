//! # Workflow Lifecycle Integration Tests
//!
//! End-to-end orchestration scenarios against a real database:
//! - Happy path through a four-step DAG
//! - Retry with exponential backoff
//! - Server-requested backoff
//! - Permanent failure blocking the task
//! - Cancellation
//! - Empty-workflow finalization

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::PgPool;

use tasker_orchestration::orchestration::task_finalizer::FinalizationAction;
use tasker_orchestration::orchestration::{
    OrchestrationSystem, StepHandler, StepHandlerError,
};
use tasker_orchestration::orchestration::handlers::StepExecutionScope;
use tasker_shared::models::core::task_transition::TaskTransition;
use tasker_shared::models::core::task_request::TaskRequest;
use tasker_shared::models::{Task, WorkflowStep};
use tasker_shared::registry::{StepTemplate, TaskTemplate};
use tasker_shared::state_machine::WorkflowStepState;
use tasker_shared::SystemContext;

struct SuccessHandler;

#[async_trait]
impl StepHandler for SuccessHandler {
    async fn call(&self, scope: StepExecutionScope) -> Result<Value, StepHandlerError> {
        Ok(json!({"step": scope.step_name, "previous": scope.previous_results.len()}))
    }
}

/// Fails with a retryable error until `failures` calls have happened
struct FlakyHandler {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl StepHandler for FlakyHandler {
    async fn call(&self, _scope: StepExecutionScope) -> Result<Value, StepHandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(StepHandlerError::retryable("transient upstream error"))
        } else {
            Ok(json!({"succeeded_on_attempt": call + 1}))
        }
    }
}

/// Fails once asking for a server-requested backoff, then succeeds
struct BackoffHandler {
    retry_after_seconds: i32,
    calls: AtomicUsize,
}

#[async_trait]
impl StepHandler for BackoffHandler {
    async fn call(&self, _scope: StepExecutionScope) -> Result<Value, StepHandlerError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(StepHandlerError::retryable("rate limited")
                .with_retry_after(self.retry_after_seconds)
                .with_error_class("RateLimitTimeout"))
        } else {
            Ok(json!({"ok": true}))
        }
    }
}

struct PermanentFailureHandler;

#[async_trait]
impl StepHandler for PermanentFailureHandler {
    async fn call(&self, _scope: StepExecutionScope) -> Result<Value, StepHandlerError> {
        Err(StepHandlerError::permanent("account does not exist")
            .with_error_code("ACCOUNT_NOT_FOUND"))
    }
}

async fn setup_system(pool: PgPool) -> Result<Arc<OrchestrationSystem>> {
    let context = Arc::new(SystemContext::with_pool(pool).await?);
    Ok(OrchestrationSystem::new(context)?)
}

/// A, B roots; C depends on B; D depends on C
fn four_step_template(namespace: &str) -> TaskTemplate {
    TaskTemplate::new(
        namespace,
        "four_step_dag",
        vec![
            StepTemplate::new("step_a", "success"),
            StepTemplate::new("step_b", "success"),
            StepTemplate::new("step_c", "success").with_depends_on(vec!["step_b".to_string()]),
            StepTemplate::new("step_d", "success").with_depends_on(vec!["step_c".to_string()]),
        ],
    )
}

async fn step_state(pool: &PgPool, task_uuid: uuid::Uuid, name: &str) -> Result<WorkflowStepState> {
    let step = WorkflowStep::find_step_by_name(pool, task_uuid, name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("step '{name}' not found"))?;
    let state = step
        .get_current_state(pool)
        .await?
        .unwrap_or_else(|| "pending".to_string());
    Ok(WorkflowStepState::from_str(&state).expect("valid state"))
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[sqlx::test(migrator = "tasker_shared::database::MIGRATOR")]
async fn test_happy_path_four_step_dag(pool: PgPool) -> Result<()> {
    let system = setup_system(pool.clone()).await?;
    system.register_handler("success", Arc::new(SuccessHandler));
    system
        .register_template(four_step_template("lifecycle_happy"))
        .await?;

    let request = TaskRequest::new("four_step_dag", "lifecycle_happy")
        .with_context(json!({"input": 6}))
        .with_initiator("lifecycle_tests");
    let created = system.submit_task_request(request).await?;
    assert_eq!(created.step_count, 4);

    let result = system.run_task(created.task_uuid).await?;
    assert_eq!(result.action, FinalizationAction::Completed);
    assert_eq!(result.completion_percentage, Some(100.0));

    for name in ["step_a", "step_b", "step_c", "step_d"] {
        assert_eq!(
            step_state(&pool, created.task_uuid, name).await?,
            WorkflowStepState::Complete,
            "{name} should be complete"
        );
    }

    // Task state history is pending -> in_progress -> complete
    let history = TaskTransition::history(&pool, created.task_uuid).await?;
    let states: Vec<&str> = history.iter().map(|t| t.to_state.as_str()).collect();
    assert_eq!(states, vec!["pending", "in_progress", "complete"]);

    // Downstream steps saw their predecessors' results
    let step_c = WorkflowStep::find_step_by_name(&pool, created.task_uuid, "step_c")
        .await?
        .unwrap();
    assert_eq!(step_c.results.as_ref().unwrap()["previous"], 1);

    // Settled tasks leave the run queue
    assert_eq!(system.reenqueuer().queue_depth().await?, 0);
    Ok(())
}

// ---------------------------------------------------------------------------
// Retry with exponential backoff
// ---------------------------------------------------------------------------

#[sqlx::test(migrator = "tasker_shared::database::MIGRATOR")]
async fn test_retry_with_exponential_backoff(pool: PgPool) -> Result<()> {
    let system = setup_system(pool.clone()).await?;
    system.register_handler(
        "flaky",
        Arc::new(FlakyHandler {
            failures: 2,
            calls: AtomicUsize::new(0),
        }),
    );
    system
        .register_template(TaskTemplate::new(
            "lifecycle_retry",
            "flaky_flow",
            vec![StepTemplate::new("flaky_step", "flaky").with_retry_limit(3)],
        ))
        .await?;

    let created = system
        .submit_task_request(TaskRequest::new("flaky_flow", "lifecycle_retry"))
        .await?;

    // Attempt 1 fails; the task defers rather than erroring
    let result = system.run_task(created.task_uuid).await?;
    assert_eq!(result.action, FinalizationAction::Reenqueued);
    assert_eq!(
        step_state(&pool, created.task_uuid, "flaky_step").await?,
        WorkflowStepState::Failed
    );

    // Immediately re-running does not retry: the 2^1 = 2s window holds
    let result = system.run_task(created.task_uuid).await?;
    assert_eq!(result.action, FinalizationAction::Reenqueued);
    let step = WorkflowStep::find_step_by_name(&pool, created.task_uuid, "flaky_step")
        .await?
        .unwrap();
    assert_eq!(step.attempts, 1, "backoff window must hold attempt 2 back");

    // Attempt 2 after the first window
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let result = system.run_task(created.task_uuid).await?;
    assert_eq!(result.action, FinalizationAction::Reenqueued);

    // Attempt 3 after the 2^2 = 4s window succeeds
    tokio::time::sleep(Duration::from_millis(4500)).await;
    let result = system.run_task(created.task_uuid).await?;
    assert_eq!(result.action, FinalizationAction::Completed);

    let step = WorkflowStep::find_step_by_name(&pool, created.task_uuid, "flaky_step")
        .await?
        .unwrap();
    assert_eq!(step.attempts, 3);
    assert_eq!(
        step_state(&pool, created.task_uuid, "flaky_step").await?,
        WorkflowStepState::Complete
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Server-requested backoff
// ---------------------------------------------------------------------------

#[sqlx::test(migrator = "tasker_shared::database::MIGRATOR")]
async fn test_server_requested_backoff_defers_task(pool: PgPool) -> Result<()> {
    let system = setup_system(pool.clone()).await?;
    system.register_handler(
        "rate_limited",
        Arc::new(BackoffHandler {
            retry_after_seconds: 30,
            calls: AtomicUsize::new(0),
        }),
    );
    system
        .register_template(TaskTemplate::new(
            "lifecycle_backoff",
            "rate_limited_flow",
            vec![StepTemplate::new("limited_step", "rate_limited").with_retry_limit(3)],
        ))
        .await?;

    let created = system
        .submit_task_request(TaskRequest::new("rate_limited_flow", "lifecycle_backoff"))
        .await?;

    let result = system.run_task(created.task_uuid).await?;
    // Before the 30s window elapses the task is re-enqueued, not errored
    assert_eq!(result.action, FinalizationAction::Reenqueued);

    let step = WorkflowStep::find_step_by_name(&pool, created.task_uuid, "limited_step")
        .await?
        .unwrap();
    assert_eq!(step.backoff_request_seconds, Some(30));
    assert_eq!(step.attempts, 1);
    assert_eq!(
        step_state(&pool, created.task_uuid, "limited_step").await?,
        WorkflowStepState::Failed
    );

    // The error payload carries the timeout-shaped class for categorization
    assert_eq!(
        step.results.as_ref().unwrap()["error_class"],
        "RateLimitTimeout"
    );

    // Re-running within the window never reaches the handler
    let result = system.run_task(created.task_uuid).await?;
    assert_eq!(result.action, FinalizationAction::Reenqueued);
    let step = WorkflowStep::find_step_by_name(&pool, created.task_uuid, "limited_step")
        .await?
        .unwrap();
    assert_eq!(step.attempts, 1);
    Ok(())
}

// ---------------------------------------------------------------------------
// Permanent failure
// ---------------------------------------------------------------------------

#[sqlx::test(migrator = "tasker_shared::database::MIGRATOR")]
async fn test_permanent_failure_blocks_task(pool: PgPool) -> Result<()> {
    let system = setup_system(pool.clone()).await?;
    system.register_handler("success", Arc::new(SuccessHandler));
    system.register_handler("permanent", Arc::new(PermanentFailureHandler));
    system
        .register_template(TaskTemplate::new(
            "lifecycle_permanent",
            "doomed_flow",
            vec![
                StepTemplate::new("prepare", "success"),
                StepTemplate::new("charge", "permanent")
                    .with_depends_on(vec!["prepare".to_string()])
                    .with_retry_limit(3),
                StepTemplate::new("notify", "success")
                    .with_depends_on(vec!["charge".to_string()]),
            ],
        ))
        .await?;

    let created = system
        .submit_task_request(TaskRequest::new("doomed_flow", "lifecycle_permanent"))
        .await?;

    let result = system.run_task(created.task_uuid).await?;
    assert_eq!(result.action, FinalizationAction::Failed);
    assert!(
        result.reason.as_deref().unwrap_or("").contains("charge"),
        "error summary should name the failed step: {:?}",
        result.reason
    );

    assert_eq!(
        step_state(&pool, created.task_uuid, "prepare").await?,
        WorkflowStepState::Complete
    );
    assert_eq!(
        step_state(&pool, created.task_uuid, "charge").await?,
        WorkflowStepState::Failed
    );
    // Downstream never ran
    assert_eq!(
        step_state(&pool, created.task_uuid, "notify").await?,
        WorkflowStepState::Pending
    );

    // Permanent failure dropped retryability despite attempts remaining
    let charge = WorkflowStep::find_step_by_name(&pool, created.task_uuid, "charge")
        .await?
        .unwrap();
    assert!(!charge.retryable);
    assert_eq!(charge.attempts, 1);
    assert_eq!(
        charge.results.as_ref().unwrap()["error_code"],
        "ACCOUNT_NOT_FOUND"
    );

    let task = Task::find_by_id(&pool, created.task_uuid).await?.unwrap();
    assert_eq!(task.get_current_state(&pool).await?.as_deref(), Some("error"));
    Ok(())
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[sqlx::test(migrator = "tasker_shared::database::MIGRATOR")]
async fn test_cancellation_cancels_pending_steps(pool: PgPool) -> Result<()> {
    let system = setup_system(pool.clone()).await?;
    system.register_handler("success", Arc::new(SuccessHandler));
    system
        .register_template(four_step_template("lifecycle_cancel"))
        .await?;

    let created = system
        .submit_task_request(TaskRequest::new("four_step_dag", "lifecycle_cancel"))
        .await?;

    assert!(system.cancel_task(created.task_uuid).await?);

    let task = Task::find_by_id(&pool, created.task_uuid).await?.unwrap();
    assert_eq!(
        task.get_current_state(&pool).await?.as_deref(),
        Some("cancelled")
    );
    for name in ["step_a", "step_b", "step_c", "step_d"] {
        assert_eq!(
            step_state(&pool, created.task_uuid, name).await?,
            WorkflowStepState::Cancelled
        );
    }
    assert_eq!(system.reenqueuer().queue_depth().await?, 0);

    // A later orchestration pass is a no-op
    let result = system.run_task(created.task_uuid).await?;
    assert_eq!(result.action, FinalizationAction::NoAction);

    // Cancelling a missing task reports not-found
    assert!(!system.cancel_task(uuid::Uuid::now_v7()).await?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Empty workflow boundary
// ---------------------------------------------------------------------------

#[sqlx::test(migrator = "tasker_shared::database::MIGRATOR")]
async fn test_task_with_no_steps_finalizes_complete(pool: PgPool) -> Result<()> {
    use tasker_shared::models::core::named_task::NamedTask;
    use tasker_shared::models::core::task::NewTask;
    use tasker_shared::models::core::task_namespace::TaskNamespace;
    use tasker_shared::models::core::task_transition::NewTaskTransition;

    let system = setup_system(pool.clone()).await?;

    // A task with zero steps cannot come from a template (templates require
    // steps); build one directly against the models
    let ns = TaskNamespace::find_or_create(&pool, "lifecycle_empty", None).await?;
    let named =
        NamedTask::find_or_create(&pool, ns.task_namespace_uuid, "empty_flow", "1.0.0", None)
            .await?;
    let task = Task::create(
        &pool,
        NewTask {
            named_task_uuid: named.named_task_uuid,
            requested_at: chrono::Utc::now().naive_utc(),
            initiator: None,
            source_system: None,
            reason: None,
            bypass_steps: None,
            tags: None,
            context: None,
            identity_hash: format!("empty-{}", uuid::Uuid::now_v7()),
            priority: 0,
            sequential: false,
            correlation_id: uuid::Uuid::now_v7(),
        },
    )
    .await?;
    TaskTransition::create(
        &pool,
        NewTaskTransition {
            task_uuid: task.task_uuid,
            to_state: "pending".to_string(),
            from_state: None,
            metadata: None,
        },
    )
    .await?;

    let context = system.discovery().get_execution_context(task.task_uuid).await?;
    let context = context.expect("context for empty task");
    assert_eq!(context.total_steps, 0);
    assert_eq!(context.completion_percentage, 0.0);

    let result = system.run_task(task.task_uuid).await?;
    assert_eq!(result.action, FinalizationAction::Completed);
    assert_eq!(
        task.get_current_state(&pool).await?.as_deref(),
        Some("complete")
    );
    Ok(())
}
