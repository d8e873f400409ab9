//! Detector error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type DetectorResult<T> = Result<T, DetectorError>;
