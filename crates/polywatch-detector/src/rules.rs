//! Detection rules.
//!
//! Each rule is a pure function of an enriched trade and the detector
//! configuration. A rule either abstains or reports one [`PatternMatch`];
//! missing optional context (no funding history, no expiry) means abstain.
//!
//! Rules that read wallet history abstain when the wallet context is
//! unknown, since a placeholder profile would look like a brand-new wallet.

use crate::config::DetectorConfig;
use chrono::{DateTime, Duration, Utc};
use polywatch_core::{
    Confidence, EnrichedTrade, HistoricalTrade, PatternMatch, PatternTag, Trade, TradeSide,
    UsdAmount,
};
use rust_decimal::Decimal;

/// Wallets first seen this recently count as new.
const NEW_WALLET_WINDOW_HOURS: i64 = 24;
/// Funding this close before the trade boosts the new-wallet score.
const NEW_WALLET_FUNDING_BONUS_HOURS: i64 = 1;
const NEW_WALLET_BASE: u8 = 60;
const NEW_WALLET_FUNDING_BONUS: u8 = 10;
const NEW_WALLET_CAP: u8 = 90;
/// Funding amount must be within this fraction of the trade size.
const FUNDING_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 1);
/// Trade must be at least this multiple of the wallet's average.
const UNUSUAL_SIZE_RATIO: Decimal = Decimal::from_parts(5, 0, 0, false, 0);
const EXPIRY_WINDOW_DAYS: i64 = 7;
const SUDDEN_ACTIVITY_MAX_TRADES: u64 = 3;
const CONCENTRATION_MAX_MARKETS: usize = 2;
const MULTI_LARGE_MIN_TRADES: usize = 2;
const IMBALANCE_MIN_TRADES: usize = 5;
/// Buy fraction at or above this (or at or below `1 - this`) is one-sided.
const IMBALANCE_FRACTION: Decimal = Decimal::from_parts(9, 0, 0, false, 1);

/// Closed set of detection rules, evaluated in [`Rule::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    NewWalletLargeTrade,
    FundingProximity,
    UnusualSize,
    ExpiringMarket,
    SuddenActivity,
    ConcentratedTrading,
    MultiLargeTrade,
    ImbalancedTrading,
}

impl Rule {
    pub const ALL: [Rule; 8] = [
        Rule::NewWalletLargeTrade,
        Rule::FundingProximity,
        Rule::UnusualSize,
        Rule::ExpiringMarket,
        Rule::SuddenActivity,
        Rule::ConcentratedTrading,
        Rule::MultiLargeTrade,
        Rule::ImbalancedTrading,
    ];

    pub fn tag(&self) -> PatternTag {
        match self {
            Self::NewWalletLargeTrade => PatternTag::NewWalletLargeTrade,
            Self::FundingProximity => PatternTag::FundingProximity,
            Self::UnusualSize => PatternTag::UnusualSize,
            Self::ExpiringMarket => PatternTag::ExpiringMarket,
            Self::SuddenActivity => PatternTag::SuddenActivity,
            Self::ConcentratedTrading => PatternTag::ConcentratedTrading,
            Self::MultiLargeTrade => PatternTag::MultiLargeTrade,
            Self::ImbalancedTrading => PatternTag::ImbalancedTrading,
        }
    }

    pub fn evaluate(&self, trade: &EnrichedTrade, config: &DetectorConfig) -> Option<PatternMatch> {
        let finding = match self {
            Self::NewWalletLargeTrade => new_wallet_large_trade(trade, config),
            Self::FundingProximity => funding_proximity(trade, config),
            Self::UnusualSize => unusual_size(trade),
            Self::ExpiringMarket => expiring_market(trade),
            Self::SuddenActivity => sudden_activity(trade, config),
            Self::ConcentratedTrading => concentrated_trading(trade, config),
            Self::MultiLargeTrade => multi_large_trade(trade, config),
            Self::ImbalancedTrading => imbalanced_trading(trade),
        };
        finding.map(|(confidence, explanation)| PatternMatch {
            tag: self.tag(),
            confidence,
            explanation,
        })
    }
}

type Finding = Option<(Confidence, String)>;

fn is_large(size: UsdAmount, config: &DetectorConfig) -> bool {
    size >= config.min_trade_size_usd
}

/// Wallet history may already include the trade under evaluation.
fn is_same_trade(history: &HistoricalTrade, trade: &Trade) -> bool {
    history.occurred_at == trade.occurred_at
        && history.market_id == trade.market_id
        && history.side == trade.side
        && history.size_usd == trade.size_usd
}

/// Whether the provider's history already lists the trade being scored.
fn history_holds(enriched: &EnrichedTrade) -> bool {
    enriched
        .wallet
        .recent_trades
        .iter()
        .any(|h| is_same_trade(h, &enriched.trade))
}

fn in_window(at: DateTime<Utc>, end: DateTime<Utc>, width: Duration) -> bool {
    at <= end && at >= end - width
}

fn new_wallet_large_trade(enriched: &EnrichedTrade, config: &DetectorConfig) -> Finding {
    let trade = &enriched.trade;
    let first_seen = enriched.wallet.first_seen_at?;
    if trade.occurred_at - first_seen > Duration::hours(NEW_WALLET_WINDOW_HOURS)
        || !is_large(trade.size_usd, config)
    {
        return None;
    }

    let age_hours = (trade.occurred_at - first_seen).num_hours().max(0);
    let funded_just_before = enriched.wallet.recent_funding_events.iter().any(|f| {
        in_window(
            f.timestamp,
            trade.occurred_at,
            Duration::hours(NEW_WALLET_FUNDING_BONUS_HOURS),
        )
    });
    let bonus = if funded_just_before { NEW_WALLET_FUNDING_BONUS } else { 0 };
    let confidence = (NEW_WALLET_BASE + bonus).min(NEW_WALLET_CAP);

    let mut explanation = format!(
        "Wallet first seen {age_hours}h before a {} trade",
        trade.size_usd
    );
    if funded_just_before {
        explanation.push_str(", funded within the hour before trading");
    }
    Some((Confidence::new(confidence), explanation))
}

fn funding_proximity(enriched: &EnrichedTrade, config: &DetectorConfig) -> Finding {
    let trade = &enriched.trade;
    if trade.size_usd.is_zero() {
        return None;
    }
    let tolerance = trade.size_usd * FUNDING_TOLERANCE;

    let (event, delta) = enriched
        .wallet
        .recent_funding_events
        .iter()
        .filter(|f| in_window(f.timestamp, trade.occurred_at, config.funding_lookback()))
        .map(|f| (f, f.amount_usd.abs_diff(trade.size_usd)))
        .filter(|(_, delta)| *delta <= tolerance)
        .min_by_key(|(_, delta)| *delta)?;

    let closeness = Decimal::ONE - delta.ratio_to(trade.size_usd)?;
    let score = (Decimal::from(50) + Decimal::from(20) * closeness).min(Decimal::from(80));
    let minutes = (trade.occurred_at - event.timestamp).num_minutes();
    Some((
        Confidence::from_decimal(score),
        format!(
            "Funded {} {minutes}m before a {} trade (within {delta})",
            event.amount_usd, trade.size_usd
        ),
    ))
}

fn unusual_size(enriched: &EnrichedTrade) -> Finding {
    if !enriched.wallet_status.is_known() {
        return None;
    }
    let average = enriched.wallet.average_trade_size()?;
    let ratio = enriched.trade.size_usd.ratio_to(average)?;
    if ratio < UNUSUAL_SIZE_RATIO {
        return None;
    }
    let bonus = (Decimal::from(8) * (ratio - UNUSUAL_SIZE_RATIO)).min(Decimal::from(40));
    Some((
        Confidence::from_decimal(Decimal::from(40) + bonus),
        format!(
            "Trade of {} is {:.1}x the wallet average of {average}",
            enriched.trade.size_usd, ratio
        ),
    ))
}

fn expiring_market(enriched: &EnrichedTrade) -> Finding {
    let expires_at = enriched.market.expires_at?;
    let remaining = expires_at - enriched.trade.occurred_at;
    if remaining < Duration::zero() || remaining > Duration::days(EXPIRY_WINDOW_DAYS) {
        return None;
    }
    Some((
        Confidence::new(50),
        format!(
            "Market expires {}h after the trade",
            remaining.num_hours()
        ),
    ))
}

fn sudden_activity(enriched: &EnrichedTrade, config: &DetectorConfig) -> Finding {
    if !enriched.wallet_status.is_known() || !is_large(enriched.trade.size_usd, config) {
        return None;
    }
    let prior = enriched
        .wallet
        .trade_count
        .saturating_sub(u64::from(history_holds(enriched)));
    if prior > SUDDEN_ACTIVITY_MAX_TRADES {
        return None;
    }
    Some((
        Confidence::new(45),
        format!(
            "Only {prior} prior trades before a {} trade",
            enriched.trade.size_usd
        ),
    ))
}

fn concentrated_trading(enriched: &EnrichedTrade, config: &DetectorConfig) -> Finding {
    if !enriched.wallet_status.is_known() {
        return None;
    }
    let wallet = &enriched.wallet;
    let markets = wallet.distinct_markets_with(&enriched.trade.market_id);
    let volume = if history_holds(enriched) {
        wallet.total_volume_usd
    } else {
        wallet.total_volume_usd + enriched.trade.size_usd
    };
    if markets > CONCENTRATION_MAX_MARKETS || volume < config.concentration_floor() {
        return None;
    }
    Some((
        Confidence::new(35),
        format!("{volume} traded across only {markets} market(s)"),
    ))
}

fn multi_large_trade(enriched: &EnrichedTrade, config: &DetectorConfig) -> Finding {
    if !enriched.wallet_status.is_known() {
        return None;
    }
    let trade = &enriched.trade;
    let window = config.trade_history_window();
    let earlier = enriched
        .wallet
        .recent_trades
        .iter()
        .filter(|h| !is_same_trade(h, trade))
        .filter(|h| in_window(h.occurred_at, trade.occurred_at, window))
        .filter(|h| is_large(h.size_usd, config))
        .count();
    let total = earlier + usize::from(is_large(trade.size_usd, config));
    if total < MULTI_LARGE_MIN_TRADES {
        return None;
    }
    Some((
        Confidence::new(70),
        format!(
            "{total} trades of at least {} within {} days",
            config.min_trade_size_usd, config.trade_history_check_days
        ),
    ))
}

fn imbalanced_trading(enriched: &EnrichedTrade) -> Finding {
    if !enriched.wallet_status.is_known() {
        return None;
    }
    let trade = &enriched.trade;
    let sides = enriched
        .wallet
        .recent_trades
        .iter()
        .filter(|h| !is_same_trade(h, trade))
        .map(|h| h.side)
        .chain(std::iter::once(trade.side));

    let (mut buys, mut total) = (0usize, 0usize);
    for side in sides {
        total += 1;
        if side == TradeSide::Buy {
            buys += 1;
        }
    }
    if total < IMBALANCE_MIN_TRADES {
        return None;
    }

    let fraction = Decimal::from(buys) / Decimal::from(total);
    if fraction < IMBALANCE_FRACTION && fraction > Decimal::ONE - IMBALANCE_FRACTION {
        return None;
    }
    Some((
        Confidence::new(30),
        format!("{buys} of {total} recent trades are buys"),
    ))
}
