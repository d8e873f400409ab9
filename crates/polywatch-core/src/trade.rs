//! Normalized market trades.
//!
//! A [`Trade`] is created once by the ingestor and never mutated after
//! that; every later stage borrows or clones it.

use crate::decimal::{Price, UsdAmount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique trade identity: `{tx_hash}#{log_index}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(String);

impl TradeId {
    /// Build from transaction hash and log index.
    ///
    /// The hash is lowercased so that feeds disagreeing on hex case
    /// still collapse to one identity.
    pub fn new(tx_hash: &str, log_index: u64) -> Self {
        Self(format!("{}#{}", tx_hash.trim().to_ascii_lowercase(), log_index))
    }

    /// Wrap an identifier that is already in canonical form.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Transaction hash portion of the identifier.
    pub fn tx_hash(&self) -> &str {
        self.0.split_once('#').map_or(self.0.as_str(), |(tx, _)| tx)
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Blockchain account address, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines and notifications (`0x1234…abcd`).
    pub fn short(&self) -> String {
        if self.0.len() <= 12 {
            return self.0.clone();
        }
        format!("{}…{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Market (condition) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(String);

impl MarketId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Parse case-insensitively (`"buy"`, `"BUY"`, `"Sell"`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One market execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub market_id: MarketId,
    pub wallet_address: WalletAddress,
    pub side: TradeSide,
    /// Outcome label, e.g. `Yes` / `No`.
    pub outcome: String,
    pub size_usd: UsdAmount,
    pub price: Price,
    pub fee_usd: UsdAmount,
    pub occurred_at: DateTime<Utc>,
}

impl Trade {
    /// Number of outcome shares bought or sold (`size / price`).
    pub fn shares(&self) -> rust_decimal::Decimal {
        self.size_usd.inner() / self.price.inner()
    }
}
