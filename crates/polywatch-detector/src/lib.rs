//! Insider-trade detection for polywatch.
//!
//! A fixed, ordered set of independent rules inspects an enriched trade;
//! their findings are reduced into one confidence score and risk level.

pub mod config;
pub mod engine;
pub mod error;
pub mod rules;

pub use config::DetectorConfig;
pub use engine::{combine_confidence, InsiderDetectionEngine};
pub use error::{DetectorError, DetectorResult};
pub use rules::Rule;
