//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Price {0} outside (0, 1]")]
    PriceOutOfRange(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl FeedError {
    /// Short label for drop metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidField { .. } => "invalid_field",
            Self::PriceOutOfRange(_) => "price_out_of_range",
            Self::HttpClient(_) => "http_client",
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
