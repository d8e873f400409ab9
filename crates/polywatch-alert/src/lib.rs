//! Alert gating and delivery for polywatch.
//!
//! - [`AlertDeduplicator`]: at most one alert per trade within a window
//! - [`Notifier`]: delivery collaborator (log, webhook, in-memory)
//! - [`AlertDispatcher`]: background delivery with independent retries

pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod notifier;

pub use dedup::{AlertDeduplicator, DedupConfig};
pub use dispatcher::AlertDispatcher;
pub use error::{AlertError, AlertResult};
pub use notifier::{LogNotifier, Notifier, RecordingNotifier, WebhookNotifier};
