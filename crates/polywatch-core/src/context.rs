//! Wallet and market context attached to a trade before detection.

use crate::decimal::UsdAmount;
use crate::trade::{MarketId, Trade, TradeSide, WalletAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Inbound transfer of value into a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingEvent {
    pub amount_usd: UsdAmount,
    pub timestamp: DateTime<Utc>,
}

/// One past trade of a wallet, as reported by the wallet provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalTrade {
    pub market_id: MarketId,
    pub side: TradeSide,
    pub size_usd: UsdAmount,
    pub occurred_at: DateTime<Utc>,
}

/// Cached view of a wallet's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletProfile {
    pub address: WalletAddress,
    /// Earliest known activity. `None` when the wallet has never been seen.
    pub first_seen_at: Option<DateTime<Utc>>,
    pub trade_count: u64,
    pub total_volume_usd: UsdAmount,
    /// Ordered oldest first.
    pub recent_funding_events: Vec<FundingEvent>,
    /// Ordered oldest first.
    pub recent_trades: Vec<HistoricalTrade>,
    pub cached_at: DateTime<Utc>,
}

impl WalletProfile {
    /// Placeholder used when no context could ever be fetched.
    pub fn unknown(address: WalletAddress, now: DateTime<Utc>) -> Self {
        Self {
            address,
            first_seen_at: None,
            trade_count: 0,
            total_volume_usd: UsdAmount::ZERO,
            recent_funding_events: Vec::new(),
            recent_trades: Vec::new(),
            cached_at: now,
        }
    }

    /// `total_volume_usd / trade_count`; undefined for a wallet with no trades.
    pub fn average_trade_size(&self) -> Option<UsdAmount> {
        if self.trade_count == 0 {
            return None;
        }
        Some(self.total_volume_usd / rust_decimal::Decimal::from(self.trade_count))
    }

    /// Distinct markets across recent history plus `current`.
    pub fn distinct_markets_with(&self, current: &MarketId) -> usize {
        let mut markets: HashSet<&MarketId> =
            self.recent_trades.iter().map(|t| &t.market_id).collect();
        markets.insert(current);
        markets.len()
    }

    /// Keep `first_seen_at` monotonically non-increasing across refreshes.
    ///
    /// Returns `true` when the fresh value was later than `prior` (an
    /// anomaly); in that case the earlier `prior` value is retained.
    pub fn retain_earliest_first_seen(&mut self, prior: Option<DateTime<Utc>>) -> bool {
        match (prior, self.first_seen_at) {
            (Some(old), Some(new)) if new > old => {
                self.first_seen_at = Some(old);
                true
            }
            (Some(old), None) => {
                self.first_seen_at = Some(old);
                true
            }
            _ => false,
        }
    }
}

/// Cached market metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub market_id: MarketId,
    pub question: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub cached_at: DateTime<Utc>,
}

impl MarketInfo {
    pub fn unknown(market_id: MarketId, now: DateTime<Utc>) -> Self {
        Self {
            market_id,
            question: String::new(),
            expires_at: None,
            cached_at: now,
        }
    }
}

/// Provenance of a context snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    /// Within TTL, or just fetched.
    Fresh,
    /// Past TTL; the refresh failed and the last known value is served.
    Stale,
    /// Never fetched successfully; placeholder values.
    Unknown,
}

impl ContextStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trade together with read-only snapshots of its context.
#[derive(Debug, Clone)]
pub struct EnrichedTrade {
    pub trade: Trade,
    pub wallet: Arc<WalletProfile>,
    pub wallet_status: ContextStatus,
    pub market: Arc<MarketInfo>,
    pub market_status: ContextStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 5, 12, 0, 0).unwrap()
    }

    fn profile() -> WalletProfile {
        WalletProfile {
            address: WalletAddress::new("0xabc"),
            first_seen_at: Some(now() - Duration::days(3)),
            trade_count: 4,
            total_volume_usd: UsdAmount::new(dec!(10000)),
            recent_funding_events: vec![],
            recent_trades: vec![
                HistoricalTrade {
                    market_id: MarketId::new("m1"),
                    side: TradeSide::Buy,
                    size_usd: UsdAmount::new(dec!(5000)),
                    occurred_at: now() - Duration::days(2),
                },
                HistoricalTrade {
                    market_id: MarketId::new("m2"),
                    side: TradeSide::Buy,
                    size_usd: UsdAmount::new(dec!(5000)),
                    occurred_at: now() - Duration::days(1),
                },
            ],
            cached_at: now(),
        }
    }

    #[test]
    fn test_average_trade_size() {
        assert_eq!(
            profile().average_trade_size(),
            Some(UsdAmount::new(dec!(2500)))
        );
        let unknown = WalletProfile::unknown(WalletAddress::new("0xabc"), now());
        assert_eq!(unknown.average_trade_size(), None);
        assert_eq!(unknown.first_seen_at, None);
    }

    #[test]
    fn test_distinct_markets_includes_current() {
        let p = profile();
        assert_eq!(p.distinct_markets_with(&MarketId::new("m1")), 2);
        assert_eq!(p.distinct_markets_with(&MarketId::new("m3")), 3);
    }

    #[test]
    fn test_first_seen_never_moves_later() {
        let earlier = now() - Duration::days(10);

        let mut p = profile();
        assert!(p.retain_earliest_first_seen(Some(earlier)));
        assert_eq!(p.first_seen_at, Some(earlier));

        let mut p = profile();
        assert!(!p.retain_earliest_first_seen(Some(now())));
        assert_eq!(p.first_seen_at, Some(now() - Duration::days(3)));

        let mut p = profile();
        assert!(!p.retain_earliest_first_seen(None));

        let mut p = WalletProfile::unknown(WalletAddress::new("0xabc"), now());
        assert!(p.retain_earliest_first_seen(Some(earlier)));
        assert_eq!(p.first_seen_at, Some(earlier));
    }
}
