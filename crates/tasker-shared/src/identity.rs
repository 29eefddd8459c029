//! # Identity
//!
//! Task identity strategies for creation-time deduplication. The hash
//! strategy is a pure function of the request's logical attributes with
//! `requested_at` bucketed to one-minute resolution, so identical requests
//! inside the window collapse to one task.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};
use crate::models::core::task_request::TaskRequest;

/// Caller-supplied hash function for the custom strategy
pub type CustomIdentityFn = Arc<dyn Fn(&TaskRequest) -> String + Send + Sync>;

#[derive(Clone)]
pub enum IdentityStrategy {
    /// Random per-task identity; no deduplication
    Default,
    /// Deterministic hash of the request attributes
    Hash,
    Custom(CustomIdentityFn),
}

impl fmt::Debug for IdentityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityStrategy::Default => f.write_str("IdentityStrategy::Default"),
            IdentityStrategy::Hash => f.write_str("IdentityStrategy::Hash"),
            IdentityStrategy::Custom(_) => f.write_str("IdentityStrategy::Custom"),
        }
    }
}

impl IdentityStrategy {
    /// Resolve the configured strategy name. `custom` requires an injected
    /// function and therefore cannot be resolved from a string alone.
    pub fn from_config(name: &str) -> TaskerResult<IdentityStrategy> {
        match name {
            "default" => Ok(IdentityStrategy::Default),
            "hash" => Ok(IdentityStrategy::Hash),
            "custom" => Err(TaskerError::ConfigurationError(
                "identity_strategy 'custom' requires an injected identity function".to_string(),
            )),
            other => Err(TaskerError::ConfigurationError(format!(
                "unknown identity_strategy '{other}' (expected default | hash | custom)"
            ))),
        }
    }

    /// Compute the identity hash for a request
    pub fn identity_hash(&self, request: &TaskRequest) -> String {
        match self {
            IdentityStrategy::Default => Uuid::now_v7().to_string(),
            IdentityStrategy::Hash => deterministic_hash(request),
            IdentityStrategy::Custom(f) => f(request),
        }
    }
}

/// SHA-256 over the canonical attribute tuple, requested_at bucketed to the
/// minute
fn deterministic_hash(request: &TaskRequest) -> String {
    let minute_bucket = request.requested_at.format("%Y-%m-%dT%H:%M");
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}",
        request.name,
        request.version,
        request.namespace,
        serde_json::to_string(&request.context).unwrap_or_default(),
        request.initiator.as_deref().unwrap_or(""),
        request.source_system.as_deref().unwrap_or(""),
        request.reason.as_deref().unwrap_or(""),
        minute_bucket,
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use serde_json::json;

    fn request_at(minute: u32, second: u32) -> TaskRequest {
        let mut request = TaskRequest::new("process_order", "fulfillment")
            .with_context(json!({"order_id": 1}))
            .with_initiator("gateway")
            .with_reason("checkout");
        request.requested_at = NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(10, minute, second)
            .unwrap();
        request
    }

    #[test]
    fn test_hash_is_deterministic_within_minute_bucket() {
        let strategy = IdentityStrategy::Hash;
        let a = strategy.identity_hash(&request_at(5, 10));
        let b = strategy.identity_hash(&request_at(5, 59));
        assert_eq!(a, b, "same minute bucket must collide");
    }

    #[test]
    fn test_hash_differs_across_minute_buckets() {
        let strategy = IdentityStrategy::Hash;
        let a = strategy.identity_hash(&request_at(5, 59));
        let b = strategy.identity_hash(&request_at(6, 0));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_sensitive_to_context() {
        let strategy = IdentityStrategy::Hash;
        let mut altered = request_at(5, 10);
        altered.context = json!({"order_id": 2});
        assert_ne!(
            strategy.identity_hash(&request_at(5, 10)),
            strategy.identity_hash(&altered)
        );
    }

    #[test]
    fn test_default_strategy_never_collides() {
        let strategy = IdentityStrategy::Default;
        let request = request_at(5, 10);
        assert_ne!(
            strategy.identity_hash(&request),
            strategy.identity_hash(&request)
        );
    }

    #[test]
    fn test_custom_strategy_uses_injected_function() {
        let strategy =
            IdentityStrategy::Custom(Arc::new(|r: &TaskRequest| format!("custom-{}", r.name)));
        assert_eq!(
            strategy.identity_hash(&request_at(5, 10)),
            "custom-process_order"
        );
    }

    #[test]
    fn test_from_config() {
        assert!(matches!(
            IdentityStrategy::from_config("default"),
            Ok(IdentityStrategy::Default)
        ));
        assert!(matches!(
            IdentityStrategy::from_config("hash"),
            Ok(IdentityStrategy::Hash)
        ));
        assert!(IdentityStrategy::from_config("custom").is_err());
        assert!(IdentityStrategy::from_config("bogus").is_err());
    }

    #[test]
    fn test_requested_at_drift_within_bucket_is_stable() {
        let strategy = IdentityStrategy::Hash;
        let base = request_at(5, 0);
        let mut drifted = base.clone();
        drifted.requested_at += Duration::seconds(30);
        assert_eq!(
            strategy.identity_hash(&base),
            strategy.identity_hash(&drifted)
        );
    }
}
