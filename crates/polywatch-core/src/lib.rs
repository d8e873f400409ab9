//! Core domain types for the polywatch insider-trade detector.
//!
//! This crate provides the types shared by every pipeline stage:
//! - `Trade`, `TradeId`, `WalletAddress`: normalized market executions
//! - `UsdAmount`, `Price`: precision-safe numeric types
//! - `WalletProfile`, `MarketInfo`, `EnrichedTrade`: cached context
//! - `DetectionVerdict`, `RiskLevel`, `Alert`: detection output
//! - `Clock`: injectable time source

pub mod alert;
pub mod clock;
pub mod context;
pub mod decimal;
pub mod error;
pub mod trade;
pub mod verdict;

use std::pin::Pin;

/// Boxed, sendable future used by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub use alert::Alert;
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{
    ContextStatus, EnrichedTrade, FundingEvent, HistoricalTrade, MarketInfo, WalletProfile,
};
pub use decimal::{Price, UsdAmount};
pub use error::{CoreError, Result};
pub use trade::{MarketId, Trade, TradeId, TradeSide, WalletAddress};
pub use verdict::{Confidence, DetectionVerdict, PatternMatch, PatternTag, RiskLevel};
