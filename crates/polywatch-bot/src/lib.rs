//! polywatch: insider-trade detector for prediction markets.
//!
//! Wires the pipeline stages together:
//! ingest -> enrich (wallet + market context) -> evaluate -> dedup -> notify.

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, Collaborators, RunSummary};
pub use config::{AppConfig, SourceKind};
pub use error::{AppError, AppResult};
