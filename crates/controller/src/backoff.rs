//! Exponential backoff for failed reconciliation passes.
//!
//! There is no maximum-attempt cutoff: reconciliation is
//! level-triggered and must keep retrying, since giving up would leave
//! an identity permanently divergent. Persistent failure shows up as
//! status lag and error counters instead.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;

use steward_api::ObjectRef;

/// Configuration for retry delays.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay for the first retry.
    pub base: Duration,
    /// Maximum delay (caps exponential growth).
    pub max: Duration,
    /// Multiplier per attempt (typically 2.0).
    pub multiplier: f64,
    /// Whether to add up to 25% jitter (reduces thundering herd).
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with the specified base delay.
    #[must_use]
    pub const fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Create a policy with the specified maximum delay.
    #[must_use]
    pub const fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Create a policy with jitter enabled/disabled.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed), capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX).min(63);
        let raw_ms = self.base.as_millis() as f64 * self.multiplier.powi(exponent);

        let jittered_ms = if self.jitter {
            raw_ms * (1.0 + rand::thread_rng().gen_range(0.0..0.25))
        } else {
            raw_ms
        };

        let capped_ms = jittered_ms.min(self.max.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

/// Per-identity retry attempt counts.
pub struct RetryTracker {
    policy: BackoffPolicy,
    attempts: Mutex<HashMap<ObjectRef, u32>>,
}

impl RetryTracker {
    /// Create a new tracker using the given policy.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObjectRef, u32>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&self, key: &ObjectRef) -> Duration {
        let mut attempts = self.lock();
        let attempt = attempts.entry(key.clone()).or_insert(0);
        let delay = self.policy.delay(*attempt);
        *attempt = attempt.saturating_add(1);
        delay
    }

    /// Reset the attempt counter after a successful pass.
    pub fn reset(&self, key: &ObjectRef) {
        self.lock().remove(key);
    }

    /// Current attempt count for an identity.
    pub fn attempts(&self, key: &ObjectRef) -> u32 {
        self.lock().get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectRef {
        ObjectRef::new("prod", name)
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = BackoffPolicy::default()
            .with_base(Duration::from_millis(100))
            .with_jitter(false);

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::default()
            .with_base(Duration::from_secs(1))
            .with_max(Duration::from_secs(5))
            .with_jitter(false);

        assert_eq!(policy.delay(10), Duration::from_secs(5));
        // Far past any representable exponent.
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::default().with_base(Duration::from_millis(100));

        for attempt in 0..5 {
            let delay = policy.delay(attempt);
            let floor = Duration::from_millis(100 * 2u64.pow(attempt));
            let ceiling = floor.mul_f64(1.25).min(policy.max);
            assert!(delay >= floor.min(policy.max));
            assert!(delay <= ceiling);
        }
    }

    #[test]
    fn test_tracker_counts_and_resets() {
        let tracker = RetryTracker::new(BackoffPolicy::default().with_jitter(false));

        let first = tracker.next_delay(&key("orders"));
        let second = tracker.next_delay(&key("orders"));
        let third = tracker.next_delay(&key("orders"));
        assert!(first <= second && second <= third);
        assert_eq!(tracker.attempts(&key("orders")), 3);

        // Other identities are independent.
        assert_eq!(tracker.attempts(&key("payments")), 0);

        tracker.reset(&key("orders"));
        assert_eq!(tracker.attempts(&key("orders")), 0);
        assert_eq!(tracker.next_delay(&key("orders")), first);
    }
}
