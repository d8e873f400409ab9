//! Per-target circuit breaker.
//!
//! CLOSED → OPEN after `threshold` consecutive failures. While OPEN every
//! call is rejected without touching the network. Once the cooldown has
//! elapsed the next caller becomes the single HALF_OPEN trial; its outcome
//! closes the circuit or re-opens it for another cooldown.

use crate::error::{UpstreamError, UpstreamResult};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use polywatch_core::Clock;
use polywatch_telemetry::Metrics;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 closed, 1 half-open, 2 open.
    pub fn as_gauge(&self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    /// HALF_OPEN only: the single trial call has been handed out.
    trial_in_flight: bool,
}

/// Consecutive-failure circuit breaker for one upstream target.
pub struct CircuitBreaker {
    target: String,
    threshold: u32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        target: impl Into<String>,
        threshold: u32,
        cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            target: target.into(),
            threshold: threshold.max(1),
            cooldown,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Ask permission for one call.
    ///
    /// # Errors
    /// `CircuitOpen` while the circuit is open and the cooldown has not
    /// elapsed, or while a half-open trial is already in flight.
    pub fn try_acquire(&self) -> UpstreamResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let now = self.clock.now();
                let cooled = inner
                    .opened_at
                    .map_or(true, |opened| now - opened >= self.cooldown);
                if !cooled {
                    return Err(self.open_error());
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!(upstream = %self.target, "Circuit half-open, allowing trial call");
                Metrics::breaker_state(&self.target, CircuitState::HalfOpen.as_gauge());
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.open_error());
                }
                inner.trial_in_flight = true;
                Ok(())
            }
        }
    }

    /// Record a call that reached a healthy upstream.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(upstream = %self.target, "Circuit closed");
            Metrics::breaker_state(&self.target, CircuitState::Closed.as_gauge());
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Record a transport-level failure.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(self.clock.now());
            inner.trial_in_flight = false;
            warn!(
                upstream = %self.target,
                failures = inner.consecutive_failures,
                cooldown_secs = self.cooldown.num_seconds(),
                "Circuit opened"
            );
            Metrics::breaker_state(&self.target, CircuitState::Open.as_gauge());
        }
    }

    /// Give back a half-open trial permit that never reached the upstream.
    pub fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    fn open_error(&self) -> UpstreamError {
        UpstreamError::CircuitOpen {
            target: self.target.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use polywatch_core::ManualClock;

    fn setup(threshold: u32, cooldown_secs: i64) -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 11, 5, 12, 0, 0).unwrap(),
        ));
        let breaker = CircuitBreaker::new(
            "data",
            threshold,
            Duration::seconds(cooldown_secs),
            clock.clone(),
        );
        (clock, breaker)
    }

    #[test]
    fn test_opens_after_threshold() {
        let (_clock, breaker) = setup(3, 30);

        for _ in 0..2 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            breaker.try_acquire(),
            Err(UpstreamError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (_clock, breaker) = setup(3, 30);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.consecutive_failures(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_allows_exactly_one_trial() {
        let (clock, breaker) = setup(1, 30);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::seconds(29));
        assert!(breaker.try_acquire().is_err());

        clock.advance(Duration::seconds(1));
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_err());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (clock, breaker) = setup(2, 30);
        breaker.record_failure();
        breaker.record_failure();
        clock.advance(Duration::seconds(30));

        breaker.try_acquire().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Fresh cooldown from the re-open time.
        clock.advance(Duration::seconds(10));
        assert!(breaker.try_acquire().is_err());
        clock.advance(Duration::seconds(20));
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_released_trial_can_be_retaken() {
        let (clock, breaker) = setup(1, 5);
        breaker.record_failure();
        clock.advance(Duration::seconds(5));

        breaker.try_acquire().unwrap();
        breaker.release_trial();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_ok());
    }
}
