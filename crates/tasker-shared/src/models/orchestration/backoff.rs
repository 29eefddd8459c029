//! # Backoff Calculator
//!
//! Owns the retry timing rules shared by the readiness projection and its
//! tests. An explicit server-requested backoff always takes precedence over
//! the never-failed shortcut; without one, failed steps wait out an
//! exponential window capped at the configured maximum.

use chrono::{Duration, NaiveDateTime};

pub const DEFAULT_MAX_BACKOFF_SECONDS: i64 = 30;

/// Timing-relevant attributes of a step
#[derive(Debug, Clone, Default)]
pub struct BackoffInput {
    pub attempts: i32,
    pub backoff_request_seconds: Option<i32>,
    pub last_attempted_at: Option<NaiveDateTime>,
    pub last_failure_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffCalculator {
    max_backoff_seconds: i64,
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self {
            max_backoff_seconds: DEFAULT_MAX_BACKOFF_SECONDS,
        }
    }
}

impl BackoffCalculator {
    pub fn new(max_backoff_seconds: i64) -> Self {
        Self {
            max_backoff_seconds,
        }
    }

    /// Whether the step's backoff window has elapsed at `now`.
    ///
    /// Rule order matters: an explicit `backoff_request_seconds` is honored
    /// even for steps that have never failed, so a server-requested wait is
    /// never short-circuited.
    pub fn backoff_satisfied(&self, input: &BackoffInput, now: NaiveDateTime) -> bool {
        match self.next_eligible_at(input) {
            Some(eligible_at) => eligible_at <= now,
            None => true,
        }
    }

    /// The earliest instant the step may run again, or `None` when it is not
    /// waiting on any backoff window
    pub fn next_eligible_at(&self, input: &BackoffInput) -> Option<NaiveDateTime> {
        if let (Some(request_seconds), Some(last_attempted_at)) =
            (input.backoff_request_seconds, input.last_attempted_at)
        {
            return Some(last_attempted_at + Duration::seconds(i64::from(request_seconds)));
        }

        let last_failure_at = input.last_failure_at?;
        Some(last_failure_at + Duration::seconds(self.exponential_delay_seconds(input.attempts)))
    }

    /// min(2^attempts, cap) seconds
    fn exponential_delay_seconds(&self, attempts: i32) -> i64 {
        if attempts < 0 {
            return 0;
        }
        // 2^attempts saturates well before the shift would overflow
        let exponential = 1i64
            .checked_shl(attempts.min(62) as u32)
            .unwrap_or(i64::MAX);
        exponential.min(self.max_backoff_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    #[test]
    fn test_never_failed_no_backoff_is_satisfied() {
        let calc = BackoffCalculator::default();
        let input = BackoffInput::default();
        assert!(calc.backoff_satisfied(&input, now()));
        assert!(calc.next_eligible_at(&input).is_none());
    }

    #[test]
    fn test_explicit_backoff_beats_never_failed_shortcut() {
        let calc = BackoffCalculator::default();
        let current = now();
        // Step has never failed but the server requested a 30s wait
        let input = BackoffInput {
            attempts: 1,
            backoff_request_seconds: Some(30),
            last_attempted_at: Some(current - Duration::seconds(5)),
            last_failure_at: None,
        };
        assert!(!calc.backoff_satisfied(&input, current));

        // Window elapses
        assert!(calc.backoff_satisfied(&input, current + Duration::seconds(26)));
    }

    #[test]
    fn test_exponential_window_grows_with_attempts() {
        let calc = BackoffCalculator::default();
        let current = now();
        let failed_at = current - Duration::seconds(3);

        // attempt 1 -> 2s window: elapsed
        let input = BackoffInput {
            attempts: 1,
            backoff_request_seconds: None,
            last_attempted_at: Some(failed_at),
            last_failure_at: Some(failed_at),
        };
        assert!(calc.backoff_satisfied(&input, current));

        // attempt 3 -> 8s window: still waiting
        let input = BackoffInput {
            attempts: 3,
            ..input
        };
        assert!(!calc.backoff_satisfied(&input, current));
    }

    #[test]
    fn test_exponential_window_caps_at_maximum() {
        let calc = BackoffCalculator::default();
        let current = now();
        let failed_at = current - Duration::seconds(31);

        // 2^10 = 1024s would be absurd; cap holds it to 30s
        let input = BackoffInput {
            attempts: 10,
            backoff_request_seconds: None,
            last_attempted_at: Some(failed_at),
            last_failure_at: Some(failed_at),
        };
        assert!(calc.backoff_satisfied(&input, current));
        assert_eq!(
            calc.next_eligible_at(&input),
            Some(failed_at + Duration::seconds(30))
        );
    }

    #[test]
    fn test_large_attempt_counts_do_not_overflow() {
        let calc = BackoffCalculator::default();
        let current = now();
        let input = BackoffInput {
            attempts: i32::MAX,
            backoff_request_seconds: None,
            last_attempted_at: Some(current),
            last_failure_at: Some(current - Duration::seconds(31)),
        };
        assert!(calc.backoff_satisfied(&input, current));
    }

    #[test]
    fn test_explicit_backoff_without_last_attempt_falls_through() {
        let calc = BackoffCalculator::default();
        let current = now();
        // backoff_request_seconds without last_attempted_at cannot anchor a
        // window; the failure-based rule applies instead
        let input = BackoffInput {
            attempts: 1,
            backoff_request_seconds: Some(300),
            last_attempted_at: None,
            last_failure_at: Some(current - Duration::seconds(3)),
        };
        assert!(calc.backoff_satisfied(&input, current));
    }
}
