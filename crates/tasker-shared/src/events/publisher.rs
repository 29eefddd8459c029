//! # Event Publisher
//!
//! Synchronous fan-out to registered subscribers. Publishing an unregistered
//! event name is a configuration error; a subscriber failure is logged and
//! never propagates to the publisher.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::errors::{TaskerError, TaskerResult};

use super::payloads::EventPayload;
use super::registry::EventRegistry;
use super::subscriber::EventSubscriber;

struct Subscription {
    subscriber: Arc<dyn EventSubscriber>,
    events: HashSet<String>,
}

pub struct EventPublisher {
    registry: EventRegistry,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .subscriptions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len();
        f.debug_struct("EventPublisher")
            .field("subscriber_count", &count)
            .finish()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            registry: EventRegistry::new(),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Register a subscriber. Every declared event name must already be
    /// registered; an unknown name fails the whole registration.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> TaskerResult<()> {
        let events: HashSet<String> = subscriber.subscribed_events().into_iter().collect();
        for event in &events {
            if !self.registry.is_registered(event) {
                return Err(TaskerError::ConfigurationError(format!(
                    "subscriber '{}' declares unregistered event '{event}'",
                    subscriber.name()
                )));
            }
        }

        debug!(
            subscriber = subscriber.name(),
            event_count = events.len(),
            "Registering event subscriber"
        );
        self.subscriptions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(Subscription { subscriber, events });
        Ok(())
    }

    /// Deliver an event to every matching subscriber on this thread.
    /// Subscriber errors are logged and swallowed.
    pub fn publish(&self, event: &str, payload: EventPayload) -> TaskerResult<()> {
        if !self.registry.is_registered(event) {
            return Err(TaskerError::ConfigurationError(format!(
                "event '{event}' is not registered; register it before publishing"
            )));
        }

        let subscriptions = self.subscriptions.read().unwrap_or_else(|p| p.into_inner());
        for subscription in subscriptions.iter() {
            if !subscription.events.contains(event) {
                continue;
            }
            if !subscription.subscriber.should_process(event, &payload) {
                continue;
            }
            if let Err(e) = subscription.subscriber.handle(event, &payload) {
                warn!(
                    subscriber = subscription.subscriber.name(),
                    event = event,
                    error = %e,
                    "Event subscriber failed; continuing delivery"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::names;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubscriber {
        name: String,
        events: Vec<String>,
        seen: AtomicUsize,
        fail: bool,
    }

    impl CountingSubscriber {
        fn new(name: &str, events: &[&str], fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                events: events.iter().map(|s| (*s).to_string()).collect(),
                seen: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl EventSubscriber for CountingSubscriber {
        fn name(&self) -> &str {
            &self.name
        }

        fn subscribed_events(&self) -> Vec<String> {
            self.events.clone()
        }

        fn handle(&self, _event: &str, _payload: &EventPayload) -> TaskerResult<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TaskerError::EventError("subscriber exploded".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn payload(event: &str) -> EventPayload {
        EventPayload::new(event, None, json!({}))
    }

    #[test]
    fn test_publish_unregistered_event_fails_fast() {
        let publisher = EventPublisher::new();
        let result = publisher.publish("task.invented", payload("task.invented"));
        assert!(matches!(result, Err(TaskerError::ConfigurationError(_))));
    }

    #[test]
    fn test_subscriber_with_unknown_event_rejected_at_registration() {
        let publisher = EventPublisher::new();
        let subscriber = CountingSubscriber::new("bad", &["task.invented"], false);
        let result = publisher.subscribe(subscriber);
        assert!(matches!(result, Err(TaskerError::ConfigurationError(_))));
    }

    #[test]
    fn test_delivery_reaches_matching_subscribers_only() {
        let publisher = EventPublisher::new();
        let step_watcher =
            CountingSubscriber::new("steps", &[names::STEP_COMPLETED, names::STEP_FAILED], false);
        let task_watcher = CountingSubscriber::new("tasks", &[names::TASK_COMPLETED], false);
        publisher.subscribe(step_watcher.clone()).unwrap();
        publisher.subscribe(task_watcher.clone()).unwrap();

        publisher
            .publish(names::STEP_COMPLETED, payload(names::STEP_COMPLETED))
            .unwrap();
        publisher
            .publish(names::STEP_FAILED, payload(names::STEP_FAILED))
            .unwrap();

        assert_eq!(step_watcher.seen.load(Ordering::SeqCst), 2);
        assert_eq!(task_watcher.seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscriber_failure_does_not_stop_delivery() {
        let publisher = EventPublisher::new();
        let exploding = CountingSubscriber::new("exploding", &[names::STEP_COMPLETED], true);
        let healthy = CountingSubscriber::new("healthy", &[names::STEP_COMPLETED], false);
        publisher.subscribe(exploding.clone()).unwrap();
        publisher.subscribe(healthy.clone()).unwrap();

        // The publisher itself succeeds despite the first subscriber failing
        publisher
            .publish(names::STEP_COMPLETED, payload(names::STEP_COMPLETED))
            .unwrap();

        assert_eq!(exploding.seen.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_custom_event_publishable_after_registration() {
        let publisher = EventPublisher::new();
        publisher
            .registry()
            .register_custom("payments.charge_settled")
            .unwrap();

        let subscriber =
            CountingSubscriber::new("payments", &["payments.charge_settled"], false);
        publisher.subscribe(subscriber.clone()).unwrap();
        publisher
            .publish("payments.charge_settled", payload("payments.charge_settled"))
            .unwrap();
        assert_eq!(subscriber.seen.load(Ordering::SeqCst), 1);
    }
}
