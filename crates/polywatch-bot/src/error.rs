//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Context error: {0}")]
    Context(#[from] polywatch_context::ContextError),

    #[error("Feed error: {0}")]
    Feed(#[from] polywatch_feed::FeedError),

    #[error("Detector error: {0}")]
    Detector(#[from] polywatch_detector::DetectorError),

    #[error("Alert error: {0}")]
    Alert(#[from] polywatch_alert::AlertError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] polywatch_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
