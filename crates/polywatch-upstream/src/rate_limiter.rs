//! Token bucket rate limiting for upstream calls.
//!
//! One bucket per upstream target. Callers that find the bucket empty
//! suspend until a token refills or their acquire timeout elapses.

use crate::error::{UpstreamError, UpstreamResult};
use parking_lot::Mutex;
use polywatch_telemetry::Metrics;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
pub struct RateLimiter {
    target: String,
    /// Tokens added per second.
    rate_per_sec: f64,
    /// Bucket capacity (burst size).
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter allowing `rate_per_sec` calls per second.
    ///
    /// Burst capacity is one second's worth of tokens, at least one.
    /// The bucket starts full.
    pub fn new(target: impl Into<String>, rate_per_sec: f64) -> Self {
        let rate_per_sec = rate_per_sec.max(f64::MIN_POSITIVE);
        let capacity = rate_per_sec.ceil().max(1.0);
        Self {
            target: target.into(),
            rate_per_sec,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.rate_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Take a token without waiting.
    ///
    /// On failure returns how long until the next token is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - bucket.tokens;
        Err(Duration::from_secs_f64(missing / self.rate_per_sec))
    }

    /// Wait for a token, giving up once `timeout` would be exceeded.
    pub async fn acquire(&self, timeout: Duration) -> UpstreamResult<()> {
        let started = Instant::now();
        loop {
            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            let waited = started.elapsed();
            if waited + wait > timeout {
                warn!(
                    upstream = %self.target,
                    waited_ms = waited.as_millis() as u64,
                    "Rate limit acquire timed out"
                );
                Metrics::rate_limited(&self.target);
                return Err(UpstreamError::RateLimited {
                    target: self.target.clone(),
                    waited_ms: waited.as_millis() as u64,
                });
            }

            debug!(
                upstream = %self.target,
                wait_ms = wait.as_millis() as u64,
                "Waiting for rate limit token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Whole tokens currently available.
    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens.floor() as u32
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}
