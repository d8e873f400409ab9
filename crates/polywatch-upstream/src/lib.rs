//! Outbound call protection for context-providing APIs.
//!
//! Every call to an upstream target goes through an [`UpstreamGuard`]:
//! - [`CircuitBreaker`]: short-circuits after repeated failures
//! - [`RateLimiter`]: token bucket per target
//! - [`RetryPolicy`]: bounded exponential backoff for transient errors
//! - a per-call timeout

pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod guard;
pub mod rate_limiter;

pub use backoff::RetryPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use error::{UpstreamError, UpstreamResult};
pub use guard::{GuardConfig, UpstreamGuard};
pub use rate_limiter::RateLimiter;
