//! Combined protection for one upstream target.

use crate::backoff::RetryPolicy;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::error::{UpstreamError, UpstreamResult};
use crate::rate_limiter::RateLimiter;
use polywatch_core::Clock;
use polywatch_telemetry::Metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Guard settings shared by every upstream target.
#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    pub rate_limit_rps: f64,
    /// Longest a caller waits for a rate-limit token.
    pub acquire_timeout: Duration,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    /// Per-attempt timeout.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rate_limit_rps: 2.0,
            acquire_timeout: Duration::from_secs(10),
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Circuit breaker, rate limiter, timeout and retry around calls to one target.
pub struct UpstreamGuard {
    target: String,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    call_timeout: Duration,
    acquire_timeout: Duration,
    retry: RetryPolicy,
}

impl UpstreamGuard {
    pub fn new(target: impl Into<String>, config: GuardConfig, clock: Arc<dyn Clock>) -> Self {
        let target = target.into();
        let cooldown = chrono::Duration::from_std(config.breaker_cooldown)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        Metrics::breaker_state(&target, CircuitState::Closed.as_gauge());
        Self {
            limiter: RateLimiter::new(target.clone(), config.rate_limit_rps),
            breaker: CircuitBreaker::new(target.clone(), config.breaker_threshold, cooldown, clock),
            call_timeout: config.call_timeout,
            acquire_timeout: config.acquire_timeout,
            retry: config.retry,
            target,
        }
    }

    /// Run `op` under the guard, retrying retryable failures.
    ///
    /// `op` is invoked once per attempt. An open circuit fails fast
    /// without invoking it.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> UpstreamResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = UpstreamResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(&mut op).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        upstream = %self.target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying upstream call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, op: &mut F) -> UpstreamResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = UpstreamResult<T>>,
    {
        if let Err(e) = self.breaker.try_acquire() {
            Metrics::upstream_call(&self.target, e.kind());
            return Err(e);
        }
        if let Err(e) = self.limiter.acquire(self.acquire_timeout).await {
            self.breaker.release_trial();
            Metrics::upstream_call(&self.target, e.kind());
            return Err(e);
        }

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout {
                target: self.target.clone(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
        };
        Metrics::upstream_latency(&self.target, started.elapsed().as_secs_f64() * 1000.0);

        match &outcome {
            Ok(_) => {
                self.breaker.record_success();
                Metrics::upstream_call(&self.target, "ok");
            }
            Err(e) => {
                if e.is_breaker_failure() {
                    self.breaker.record_failure();
                } else {
                    self.breaker.record_success();
                }
                Metrics::upstream_call(&self.target, e.kind());
            }
        }
        outcome
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }
}
