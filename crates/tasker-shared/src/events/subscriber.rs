//! # Event Subscriber
//!
//! Subscribers declare the event names they consume at registration time and
//! receive payloads synchronously. Handler existence is checked when a
//! subscriber registers, never at first event. The bus does not deduplicate;
//! handlers must tolerate duplicate delivery.

use crate::errors::TaskerResult;

use super::payloads::EventPayload;

pub trait EventSubscriber: Send + Sync {
    /// Stable identifier used in logs
    fn name(&self) -> &str;

    /// Event names this subscriber consumes; validated against the registry
    /// at registration
    fn subscribed_events(&self) -> Vec<String>;

    /// Cheap pre-filter; defaults to accepting everything subscribed
    fn should_process(&self, _event: &str, _payload: &EventPayload) -> bool {
        true
    }

    /// Handle one event. Errors are logged by the publisher and never
    /// propagate to the publishing component.
    fn handle(&self, event: &str, payload: &EventPayload) -> TaskerResult<()>;
}
