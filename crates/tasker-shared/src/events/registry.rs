//! # Event Registry
//!
//! Explicit registration of every event name a publisher may emit.
//! Publishing an unregistered name fails fast with a configuration error.
//! Custom events must carry a namespace (a dot) and may not collide with the
//! reserved prefixes.

use std::collections::HashSet;
use std::path::Path;
use std::sync::RwLock;

use serde::Deserialize;

use crate::errors::{TaskerError, TaskerResult};

use super::names;

#[derive(Debug)]
pub struct EventRegistry {
    registered: RwLock<HashSet<String>>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of a custom-events TOML file: `events = ["payments.charge_settled"]`
#[derive(Debug, Deserialize)]
struct CustomEventsFile {
    #[serde(default)]
    events: Vec<String>,
}

impl EventRegistry {
    /// A registry pre-loaded with the standard event vocabulary
    pub fn new() -> Self {
        let registered = names::standard_events()
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        Self {
            registered: RwLock::new(registered),
        }
    }

    pub fn is_registered(&self, event: &str) -> bool {
        self.registered
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains(event)
    }

    /// Register a developer-defined event name.
    ///
    /// The name must contain a namespace dot and must not use a reserved
    /// prefix. Re-registering an existing name is a no-op.
    pub fn register_custom(&self, event: &str) -> TaskerResult<()> {
        if !event.contains('.') || event.starts_with('.') || event.ends_with('.') {
            return Err(TaskerError::ConfigurationError(format!(
                "custom event '{event}' must be namespaced as '{{domain}}.{{action}}'"
            )));
        }
        if let Some(prefix) = names::RESERVED_PREFIXES
            .iter()
            .find(|prefix| event.starts_with(**prefix))
        {
            return Err(TaskerError::ConfigurationError(format!(
                "custom event '{event}' collides with reserved prefix '{prefix}'"
            )));
        }

        self.registered
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(event.to_string());
        Ok(())
    }

    /// Load custom event registrations from every `.toml` file in a directory
    pub fn register_custom_events_from_dir(&self, dir: impl AsRef<Path>) -> TaskerResult<usize> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            TaskerError::ConfigurationError(format!(
                "cannot read custom events directory {}: {e}",
                dir.display()
            ))
        })?;

        let mut count = 0;
        for entry in entries {
            let path = entry
                .map_err(|e| {
                    TaskerError::ConfigurationError(format!("cannot read directory entry: {e}"))
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }

            let contents = std::fs::read_to_string(&path).map_err(|e| {
                TaskerError::ConfigurationError(format!("cannot read {}: {e}", path.display()))
            })?;
            let parsed: CustomEventsFile = toml::from_str(&contents).map_err(|e| {
                TaskerError::ConfigurationError(format!("cannot parse {}: {e}", path.display()))
            })?;

            for event in &parsed.events {
                self.register_custom(event)?;
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn registered_events(&self) -> Vec<String> {
        let mut events: Vec<String> = self
            .registered
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect();
        events.sort();
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_standard_events_pre_registered() {
        let registry = EventRegistry::new();
        assert!(registry.is_registered(names::TASK_STARTED));
        assert!(registry.is_registered(names::STEP_COMPLETED));
        assert!(registry.is_registered(names::WORKFLOW_VIABLE_STEPS_DISCOVERED));
        assert!(!registry.is_registered("task.made_up"));
    }

    #[test]
    fn test_custom_event_requires_namespace() {
        let registry = EventRegistry::new();
        assert!(registry.register_custom("no_namespace").is_err());
        assert!(registry.register_custom(".leading").is_err());
        assert!(registry.register_custom("trailing.").is_err());
        assert!(registry.register_custom("payments.charge_settled").is_ok());
        assert!(registry.is_registered("payments.charge_settled"));
    }

    #[test]
    fn test_custom_event_rejects_reserved_prefixes() {
        let registry = EventRegistry::new();
        for name in [
            "task.sneaky",
            "step.sneaky",
            "workflow.sneaky",
            "observability.sneaky",
        ] {
            assert!(
                matches!(
                    registry.register_custom(name),
                    Err(TaskerError::ConfigurationError(_))
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_re_registration_is_noop() {
        let registry = EventRegistry::new();
        registry.register_custom("payments.charge_settled").unwrap();
        registry.register_custom("payments.charge_settled").unwrap();
    }

    #[test]
    fn test_load_custom_events_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("payments.toml")).unwrap();
        writeln!(
            file,
            "events = [\"payments.charge_settled\", \"payments.charge_declined\"]"
        )
        .unwrap();
        // Non-toml files are skipped
        std::fs::File::create(dir.path().join("README.md")).unwrap();

        let registry = EventRegistry::new();
        let count = registry.register_custom_events_from_dir(dir.path()).unwrap();
        assert_eq!(count, 2);
        assert!(registry.is_registered("payments.charge_declined"));
    }

    #[test]
    fn test_missing_dir_is_configuration_error() {
        let registry = EventRegistry::new();
        let result = registry.register_custom_events_from_dir("/does/not/exist");
        assert!(matches!(result, Err(TaskerError::ConfigurationError(_))));
    }
}
