//! Bounded exponential backoff.

use std::time::Duration;

/// Retry schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// `initial * 2^(attempt-1)`, capped at `max_delay`, plus jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        base + jitter(self.max_jitter)
    }
}

/// Cheap jitter in `[0, max)` from the sub-second clock.
fn jitter(max: Duration) -> Duration {
    use std::time::{SystemTime, UNIX_EPOCH};
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    Duration::from_millis(u64::from(nanos) % max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(4), Duration::from_secs(5));
        assert_eq!(p.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_bounds_attempts() {
        let p = policy();
        assert!(p.should_retry(1));
        assert!(p.should_retry(3));
        assert!(!p.should_retry(4));
        assert!(!RetryPolicy::none().should_retry(1));
    }

    #[test]
    fn test_jitter_bounded() {
        let p = RetryPolicy {
            max_jitter: Duration::from_millis(100),
            ..policy()
        };
        let d = p.delay_for(1);
        assert!(d >= Duration::from_secs(1));
        assert!(d < Duration::from_millis(1100));
    }
}
