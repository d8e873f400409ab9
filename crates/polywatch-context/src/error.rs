//! Context error types.

use polywatch_upstream::UpstreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

pub type ContextResult<T> = Result<T, ContextError>;
