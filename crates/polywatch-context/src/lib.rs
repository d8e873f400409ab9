//! Wallet and market context for trade enrichment.
//!
//! - `ContextCache`: generic TTL + LRU cache with single-flight refresh
//! - `WalletProvider` / `MarketProvider`: upstream lookups (HTTP or mock)
//! - `WalletContext` / `MarketContext`: cached, guarded resolution with
//!   stale and unknown fallbacks

mod arena;
pub mod cache;
pub mod client;
pub mod error;
pub mod provider;
pub mod resolver;

pub use cache::{CacheConfig, ContextCache, Snapshot};
pub use client::{HttpMarketProvider, HttpWalletProvider};
pub use error::{ContextError, ContextResult};
pub use provider::{MarketProvider, MockMarketProvider, MockWalletProvider, WalletProvider};
pub use resolver::{MarketContext, WalletContext};
