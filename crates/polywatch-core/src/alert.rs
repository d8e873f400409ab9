//! The externally visible unit handed to notifiers.

use crate::context::ContextStatus;
use crate::trade::Trade;
use crate::verdict::{DetectionVerdict, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable alert snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub trade: Trade,
    pub verdict: DetectionVerdict,
    /// Market question, when market context was available.
    pub market_question: Option<String>,
    pub wallet_status: ContextStatus,
    pub dispatched_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        trade: Trade,
        verdict: DetectionVerdict,
        market_question: Option<String>,
        wallet_status: ContextStatus,
        dispatched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            trade,
            verdict,
            market_question,
            wallet_status,
            dispatched_at,
        }
    }

    /// Risk level of the verdict; alerts are only built from alertable verdicts.
    pub fn risk_level(&self) -> RiskLevel {
        self.verdict.risk_level.unwrap_or(RiskLevel::Low)
    }

    /// One-line human summary used by log-based notifiers.
    pub fn headline(&self) -> String {
        format!(
            "[{}] {} {} {} @ {} by {} ({})",
            self.risk_level(),
            self.trade.side,
            self.trade.size_usd,
            self.trade.outcome,
            self.trade.price,
            self.trade.wallet_address.short(),
            self.verdict.combined_confidence,
        )
    }
}
