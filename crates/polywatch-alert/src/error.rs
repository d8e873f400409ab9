//! Alert error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("Delivery via {notifier} failed: {message}")]
    Delivery { notifier: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Dispatcher is shut down")]
    DispatcherClosed,
}

pub type AlertResult<T> = Result<T, AlertError>;
