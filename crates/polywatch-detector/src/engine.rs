//! Insider detection engine.
//!
//! Detection is a pure function of an enriched trade plus configuration,
//! so one engine is shared by every worker without locking.

use crate::config::DetectorConfig;
use crate::error::DetectorResult;
use crate::rules::Rule;
use polywatch_core::{Confidence, DetectionVerdict, EnrichedTrade, PatternMatch};
use polywatch_telemetry::Metrics;
use std::time::Instant;
use tracing::debug;

/// Points added per corroborating pattern beyond the strongest one.
const CORROBORATION_BONUS: u32 = 5;

/// Reduce individual matches into one score.
///
/// `min(100, max + 5 * (n - 1))`; zero when nothing matched.
pub fn combine_confidence(matches: &[PatternMatch]) -> Confidence {
    let Some(strongest) = matches.iter().map(|m| m.confidence).max() else {
        return Confidence::ZERO;
    };
    let corroborating = (matches.len() as u32).saturating_sub(1);
    let combined = u32::from(strongest.value())
        .saturating_add(CORROBORATION_BONUS.saturating_mul(corroborating))
        .min(100);
    Confidence::new(combined as u8)
}

/// Applies every [`Rule`] in order and combines the findings.
#[derive(Debug, Clone)]
pub struct InsiderDetectionEngine {
    config: DetectorConfig,
}

impl InsiderDetectionEngine {
    /// # Errors
    /// Invalid configuration.
    pub fn new(config: DetectorConfig) -> DetectorResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn evaluate(&self, enriched: &EnrichedTrade) -> DetectionVerdict {
        let started = Instant::now();

        let matches: Vec<PatternMatch> = Rule::ALL
            .iter()
            .filter_map(|rule| rule.evaluate(enriched, &self.config))
            .collect();
        for m in &matches {
            Metrics::pattern_matched(m.tag.as_str());
        }

        let combined = combine_confidence(&matches);
        let verdict = DetectionVerdict::new(enriched.trade.trade_id.clone(), matches, combined);

        Metrics::verdict(verdict.risk_level.map_or("none", |r| r.as_str()));
        Metrics::evaluation_latency(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            trade_id = %verdict.trade_id,
            wallet = %enriched.trade.wallet_address,
            wallet_context = %enriched.wallet_status,
            market_context = %enriched.market_status,
            patterns = verdict.matched_patterns.len(),
            confidence = verdict.combined_confidence.value(),
            risk = ?verdict.risk_level,
            "Trade evaluated"
        );
        verdict
    }
}
