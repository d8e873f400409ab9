//! Trade ingestion for polywatch.
//!
//! Pulls raw trade events from a poll-based or push-based source,
//! normalizes them into `Trade`s and drops replays.

pub mod client;
pub mod error;
pub mod ingestor;
pub mod parser;
pub mod source;

pub use client::HttpTradePoller;
pub use error::{FeedError, FeedResult};
pub use ingestor::{SeenTrades, TradeIngestor, DEFAULT_DEDUP_CAPACITY};
pub use parser::{parse_trade, RawTrade};
pub use source::{MockTradePoller, TradePoller, TradeSource};
