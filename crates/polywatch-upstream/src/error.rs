//! Upstream call error taxonomy.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Network failure or 5xx; retried with backoff.
    #[error("Transient failure from {target}: {message}")]
    Transient { target: String, message: String },

    /// Response could not be decoded; never retried.
    #[error("Malformed response from {target}: {message}")]
    Malformed { target: String, message: String },

    #[error("Not found at {target}: {key}")]
    NotFound { target: String, key: String },

    #[error("Rate limited on {target} after {waited_ms}ms")]
    RateLimited { target: String, waited_ms: u64 },

    #[error("Circuit open for {target}")]
    CircuitOpen { target: String },

    #[error("Call to {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },
}

impl UpstreamError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }

    /// Whether this outcome means the upstream itself is unhealthy.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Malformed { .. } => "malformed",
            Self::NotFound { .. } => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Classify an HTTP client error.
    pub fn from_http(target: &str, err: &reqwest::Error) -> Self {
        let target = target.to_string();
        if err.is_timeout() {
            return Self::Timeout {
                target,
                timeout_ms: 0,
            };
        }
        if err.is_decode() {
            return Self::Malformed {
                target,
                message: err.to_string(),
            };
        }
        match err.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => Self::NotFound {
                target,
                key: err.url().map(|u| u.path().to_string()).unwrap_or_default(),
            },
            Some(status) if status == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Self::RateLimited {
                    target,
                    waited_ms: 0,
                }
            }
            Some(status) if status.is_client_error() => Self::Malformed {
                target,
                message: err.to_string(),
            },
            _ => Self::Transient {
                target,
                message: err.to_string(),
            },
        }
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;
