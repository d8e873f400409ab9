//! Detection output types.

use crate::trade::TradeId;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Suspicious-activity pattern recognized by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternTag {
    NewWalletLargeTrade,
    FundingProximity,
    UnusualSize,
    ExpiringMarket,
    SuddenActivity,
    ConcentratedTrading,
    MultiLargeTrade,
    ImbalancedTrading,
}

impl PatternTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewWalletLargeTrade => "new_wallet_large_trade",
            Self::FundingProximity => "funding_proximity",
            Self::UnusualSize => "unusual_size",
            Self::ExpiringMarket => "expiring_market",
            Self::SuddenActivity => "sudden_activity",
            Self::ConcentratedTrading => "concentrated_trading",
            Self::MultiLargeTrade => "multi_large_trade",
            Self::ImbalancedTrading => "imbalanced_trading",
        }
    }
}

impl fmt::Display for PatternTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score in `0..=100`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Confidence(u8);

impl Confidence {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(100);

    /// Clamps to 100.
    pub fn new(value: u8) -> Self {
        Self(value.min(100))
    }

    /// Truncates toward zero, then clamps into `0..=100`.
    pub fn from_decimal(value: Decimal) -> Self {
        let clamped = value.trunc().max(Decimal::ZERO).min(Decimal::ONE_HUNDRED);
        Self(clamped.to_u8().unwrap_or(0))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Coarse triage bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Lowest combined confidence that produces an alert.
    pub const ALERT_THRESHOLD: u8 = 30;

    /// Fixed step function. `None` below [`Self::ALERT_THRESHOLD`].
    pub fn from_confidence(confidence: Confidence) -> Option<Self> {
        match confidence.value() {
            0..=29 => None,
            30..=49 => Some(Self::Low),
            50..=69 => Some(Self::Medium),
            70..=89 => Some(Self::High),
            _ => Some(Self::Critical),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rule's positive finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub tag: PatternTag,
    pub confidence: Confidence,
    pub explanation: String,
}

/// The engine's output for one trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionVerdict {
    pub trade_id: TradeId,
    /// In rule evaluation order.
    pub matched_patterns: Vec<PatternMatch>,
    pub combined_confidence: Confidence,
    /// `None` means the verdict is below the alert threshold.
    pub risk_level: Option<RiskLevel>,
    /// One entry per matched pattern, same order.
    pub explanations: Vec<String>,
}

impl DetectionVerdict {
    /// Assemble a verdict; `combined` is forced to zero when nothing matched.
    pub fn new(trade_id: TradeId, matched_patterns: Vec<PatternMatch>, combined: Confidence) -> Self {
        let combined_confidence = if matched_patterns.is_empty() {
            Confidence::ZERO
        } else {
            combined
        };
        let explanations = matched_patterns
            .iter()
            .map(|m| m.explanation.clone())
            .collect();
        Self {
            trade_id,
            matched_patterns,
            combined_confidence,
            risk_level: RiskLevel::from_confidence(combined_confidence),
            explanations,
        }
    }

    pub fn is_alertable(&self) -> bool {
        self.risk_level.is_some()
    }

    pub fn pattern_tags(&self) -> BTreeSet<PatternTag> {
        self.matched_patterns.iter().map(|m| m.tag).collect()
    }

    pub fn has_pattern(&self, tag: PatternTag) -> bool {
        self.matched_patterns.iter().any(|m| m.tag == tag)
    }
}
