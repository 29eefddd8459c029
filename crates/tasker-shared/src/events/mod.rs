//! # Events
//!
//! Process-local publish/subscribe bus. Event names are dotted
//! `{domain}.{action}` identifiers and must be registered before anything may
//! publish them; delivery is synchronous on the publisher's thread with a
//! log-and-continue policy for subscriber failures.

pub mod names;
pub mod payloads;
pub mod publisher;
pub mod registry;
pub mod subscriber;

pub use payloads::{EventPayload, TaskPayloadInputs};
pub use publisher::EventPublisher;
pub use registry::EventRegistry;
pub use subscriber::EventSubscriber;
