//! Periodic statistics summary.
//!
//! Reads the process-wide counters and logs a compact summary; the
//! orchestration loop calls [`StatsReporter::log_summary`] on a timer.

use crate::metrics::{
    ALERTS_ADMITTED_TOTAL, ALERTS_SUPPRESSED_TOTAL, ALERT_DELIVERIES_TOTAL, CACHE_LOOKUPS_TOTAL,
    TRADES_DROPPED_TOTAL, TRADES_DUPLICATE_TOTAL, TRADES_INGESTED_TOTAL,
};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use prometheus::CounterVec;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Snapshot of pipeline counters since process start.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub trades_ingested: u64,
    pub trades_duplicate: u64,
    pub trades_dropped: u64,
    /// `cache -> outcome -> count`
    pub cache_lookups: BTreeMap<String, BTreeMap<String, u64>>,
    /// `risk -> count`
    pub alerts_by_risk: BTreeMap<String, u64>,
    pub alerts_suppressed: u64,
    pub deliveries_failed: u64,
}

impl PipelineStats {
    /// Fraction of lookups on `cache` served without an upstream fetch.
    pub fn cache_hit_ratio(&self, cache: &str) -> Option<f64> {
        let outcomes = self.cache_lookups.get(cache)?;
        let total: u64 = outcomes.values().sum();
        if total == 0 {
            return None;
        }
        let hits = outcomes.get("hit").copied().unwrap_or(0);
        Some(hits as f64 / total as f64)
    }

    pub fn alerts_total(&self) -> u64 {
        self.alerts_by_risk.values().sum()
    }
}

/// Periodic statistics reporter.
pub struct StatsReporter {
    start_time: DateTime<Utc>,
}

impl Default for StatsReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsReporter {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
        }
    }

    /// Read current counter values.
    pub fn snapshot(&self) -> PipelineStats {
        let mut cache_lookups: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        for (labels, value) in label_values(&CACHE_LOOKUPS_TOTAL) {
            if let [cache, outcome] = labels.as_slice() {
                cache_lookups
                    .entry(cache.clone())
                    .or_default()
                    .insert(outcome.clone(), value);
            }
        }

        let alerts_by_risk = label_values(&ALERTS_ADMITTED_TOTAL)
            .into_iter()
            .filter_map(|(labels, value)| labels.into_iter().next().map(|risk| (risk, value)))
            .collect();

        let deliveries_failed = label_values(&ALERT_DELIVERIES_TOTAL)
            .into_iter()
            .filter(|(labels, _)| labels.get(1).is_some_and(|o| o == "failed"))
            .map(|(_, v)| v)
            .sum();

        PipelineStats {
            trades_ingested: TRADES_INGESTED_TOTAL.get() as u64,
            trades_duplicate: TRADES_DUPLICATE_TOTAL.get() as u64,
            trades_dropped: label_values(&TRADES_DROPPED_TOTAL)
                .into_iter()
                .map(|(_, v)| v)
                .sum(),
            cache_lookups,
            alerts_by_risk,
            alerts_suppressed: ALERTS_SUPPRESSED_TOTAL.get() as u64,
            deliveries_failed,
        }
    }

    /// Output a summary to logs.
    pub fn log_summary(&self) {
        let stats = self.snapshot();
        let uptime = Utc::now() - self.start_time;

        info!(
            uptime_mins = uptime.num_minutes(),
            trades_ingested = stats.trades_ingested,
            trades_duplicate = stats.trades_duplicate,
            trades_dropped = stats.trades_dropped,
            alerts = stats.alerts_total(),
            alerts_suppressed = stats.alerts_suppressed,
            deliveries_failed = stats.deliveries_failed,
            wallet_hit_ratio = stats.cache_hit_ratio("wallet").unwrap_or(0.0),
            market_hit_ratio = stats.cache_hit_ratio("market").unwrap_or(0.0),
            "Pipeline statistics"
        );
        for (risk, count) in &stats.alerts_by_risk {
            info!(%risk, count, "Alerts by risk level");
        }
    }
}

/// Flatten a counter vec into `(label values, count)` pairs.
fn label_values(counter: &CounterVec) -> Vec<(Vec<String>, u64)> {
    let mut out = Vec::new();
    for mf in counter.collect() {
        for m in mf.get_metric() {
            let labels = m
                .get_label()
                .iter()
                .map(|pair| pair.get_value().to_string())
                .collect();
            out.push((labels, m.get_counter().get_value() as u64));
        }
    }
    out
}
