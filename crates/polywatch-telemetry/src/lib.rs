//! Prometheus metrics and structured logging for polywatch.
//!
//! - Prometheus counters and gauges for every pipeline stage
//! - Structured logging with tracing (JSON in production)
//! - Periodic statistics summary

pub mod error;
pub mod logging;
pub mod metrics;
pub mod stats;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use stats::{PipelineStats, StatsReporter};
