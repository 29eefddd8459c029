//! # Orchestration Metrics
//!
//! Runtime counters for the orchestration system, updated by an event
//! subscriber rather than by core logic, and rendered in Prometheus text
//! exposition format for `GET /metrics`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tasker_shared::events::names;
use tasker_shared::events::{EventPayload, EventSubscriber};
use tasker_shared::TaskerResult;

#[derive(Debug, Default)]
pub struct OrchestrationMetrics {
    pub tasks_started: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_cancelled: AtomicU64,
    pub steps_completed: AtomicU64,
    pub steps_failed: AtomicU64,
    pub reenqueues: AtomicU64,
    pub iterations: AtomicU64,
}

impl OrchestrationMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Render all counters in Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let counters = [
            (
                "tasker_tasks_started_total",
                "Tasks transitioned to in_progress",
                self.tasks_started.load(Ordering::Relaxed),
            ),
            (
                "tasker_tasks_completed_total",
                "Tasks completed",
                self.tasks_completed.load(Ordering::Relaxed),
            ),
            (
                "tasker_tasks_failed_total",
                "Tasks transitioned to error",
                self.tasks_failed.load(Ordering::Relaxed),
            ),
            (
                "tasker_tasks_cancelled_total",
                "Tasks cancelled",
                self.tasks_cancelled.load(Ordering::Relaxed),
            ),
            (
                "tasker_steps_completed_total",
                "Workflow steps completed",
                self.steps_completed.load(Ordering::Relaxed),
            ),
            (
                "tasker_steps_failed_total",
                "Workflow step failures (including retried attempts)",
                self.steps_failed.load(Ordering::Relaxed),
            ),
            (
                "tasker_task_reenqueues_total",
                "Tasks deferred back to the run queue",
                self.reenqueues.load(Ordering::Relaxed),
            ),
            (
                "tasker_orchestration_iterations_total",
                "Orchestration loop iterations",
                self.iterations.load(Ordering::Relaxed),
            ),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        out
    }
}

/// The subscriber wiring events to the counters
#[derive(Debug)]
pub struct MetricsSubscriber {
    metrics: Arc<OrchestrationMetrics>,
}

impl MetricsSubscriber {
    pub fn new(metrics: Arc<OrchestrationMetrics>) -> Arc<Self> {
        Arc::new(Self { metrics })
    }
}

impl EventSubscriber for MetricsSubscriber {
    fn name(&self) -> &str {
        "orchestration_metrics"
    }

    fn subscribed_events(&self) -> Vec<String> {
        vec![
            names::TASK_STARTED.to_string(),
            names::TASK_COMPLETED.to_string(),
            names::TASK_FAILED.to_string(),
            names::TASK_CANCELLED.to_string(),
            names::STEP_COMPLETED.to_string(),
            names::STEP_FAILED.to_string(),
            names::WORKFLOW_TASK_REENQUEUE_STARTED.to_string(),
            names::WORKFLOW_ITERATION_STARTED.to_string(),
        ]
    }

    fn handle(&self, event: &str, _payload: &EventPayload) -> TaskerResult<()> {
        let counter = match event {
            names::TASK_STARTED => &self.metrics.tasks_started,
            names::TASK_COMPLETED => &self.metrics.tasks_completed,
            names::TASK_FAILED => &self.metrics.tasks_failed,
            names::TASK_CANCELLED => &self.metrics.tasks_cancelled,
            names::STEP_COMPLETED => &self.metrics.steps_completed,
            names::STEP_FAILED => &self.metrics.steps_failed,
            names::WORKFLOW_TASK_REENQUEUE_STARTED => &self.metrics.reenqueues,
            names::WORKFLOW_ITERATION_STARTED => &self.metrics.iterations,
            _ => return Ok(()),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscriber_increments_matching_counter() {
        let metrics = OrchestrationMetrics::new();
        let subscriber = MetricsSubscriber::new(metrics.clone());

        let payload = EventPayload::new(names::STEP_COMPLETED, None, json!({}));
        subscriber.handle(names::STEP_COMPLETED, &payload).unwrap();
        subscriber.handle(names::STEP_COMPLETED, &payload).unwrap();
        subscriber.handle(names::STEP_FAILED, &payload).unwrap();

        assert_eq!(metrics.steps_completed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.steps_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.tasks_completed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = OrchestrationMetrics::new();
        metrics.tasks_completed.fetch_add(5, Ordering::Relaxed);

        let text = metrics.render_prometheus();
        assert!(text.contains("# TYPE tasker_tasks_completed_total counter"));
        assert!(text.contains("tasker_tasks_completed_total 5"));
        assert!(text.contains("tasker_steps_failed_total 0"));
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let metrics = OrchestrationMetrics::new();
        let subscriber = MetricsSubscriber::new(metrics.clone());
        let payload = EventPayload::new(names::STEP_RETRY_REQUESTED, None, json!({}));
        subscriber
            .handle(names::STEP_RETRY_REQUESTED, &payload)
            .unwrap();
        assert_eq!(metrics.steps_completed.load(Ordering::Relaxed), 0);
    }
}
