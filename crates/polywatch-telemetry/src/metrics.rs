//! Prometheus metrics for the detection pipeline.
//!
//! Covers:
//! - Trade ingestion (accepted, duplicate, dropped)
//! - Context cache lookups and sizes
//! - Upstream calls, latency and circuit state
//! - Pattern matches, verdicts and alert delivery
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration
//! failure means duplicate metric names, a programming error that should
//! crash at startup. These panics only occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec,
    register_int_gauge, register_int_gauge_vec, Counter, CounterVec, Encoder, Histogram,
    HistogramVec, IntGauge, IntGaugeVec, TextEncoder,
};

/// Trades accepted by the ingestor.
pub static TRADES_INGESTED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "polywatch_trades_ingested_total",
        "Trades accepted by the ingestor"
    )
    .unwrap()
});

/// Trades seen again within the dedup window.
pub static TRADES_DUPLICATE_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "polywatch_trades_duplicate_total",
        "Trades dropped as already seen"
    )
    .unwrap()
});

/// Malformed trades dropped.
/// Labels: reason
pub static TRADES_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "polywatch_trades_dropped_total",
        "Trades dropped as malformed",
        &["reason"]
    )
    .unwrap()
});

/// Ingest watermark as unix seconds.
pub static INGEST_CURSOR: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "polywatch_ingest_cursor_seconds",
        "Ingest watermark (unix seconds)"
    )
    .unwrap()
});

/// Cache lookups.
/// Labels: cache (wallet/market), outcome (hit/miss/stale/unknown)
pub static CACHE_LOOKUPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "polywatch_cache_lookups_total",
        "Context cache lookups by outcome",
        &["cache", "outcome"]
    )
    .unwrap()
});

/// Entries held per cache.
pub static CACHE_ENTRIES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "polywatch_cache_entries",
        "Entries held per context cache",
        &["cache"]
    )
    .unwrap()
});

/// Cache evictions under size pressure.
pub static CACHE_EVICTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "polywatch_cache_evictions_total",
        "Least-recently-used evictions",
        &["cache"]
    )
    .unwrap()
});

/// Upstream call outcomes.
/// Labels: target, outcome (ok/transient/timeout/...)
pub static UPSTREAM_CALLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "polywatch_upstream_calls_total",
        "Upstream call outcomes",
        &["target", "outcome"]
    )
    .unwrap()
});

/// Upstream call latency in milliseconds.
pub static UPSTREAM_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "polywatch_upstream_latency_ms",
        "Upstream call latency in milliseconds",
        &["target"],
        vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]
    )
    .unwrap()
});

/// Circuit state per target (0=closed, 1=half-open, 2=open).
pub static BREAKER_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "polywatch_breaker_state",
        "Circuit breaker state (0=closed, 1=half_open, 2=open)",
        &["target"]
    )
    .unwrap()
});

/// Rate-limit acquire timeouts.
pub static RATE_LIMITED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "polywatch_rate_limited_total",
        "Calls that gave up waiting for a rate-limit token",
        &["target"]
    )
    .unwrap()
});

/// Rule matches.
/// Labels: pattern
pub static PATTERN_MATCHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "polywatch_pattern_matches_total",
        "Detection rule matches",
        &["pattern"]
    )
    .unwrap()
});

/// Verdicts by risk level ("none" below the alert threshold).
pub static VERDICTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "polywatch_verdicts_total",
        "Detection verdicts by risk level",
        &["risk"]
    )
    .unwrap()
});

/// Enrichment + evaluation latency per trade.
pub static EVALUATION_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "polywatch_evaluation_latency_ms",
        "Enrichment and evaluation latency per trade in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0]
    )
    .unwrap()
});

/// Alerts admitted by the deduplicator.
pub static ALERTS_ADMITTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "polywatch_alerts_admitted_total",
        "Alerts admitted by the deduplicator",
        &["risk"]
    )
    .unwrap()
});

/// Alerts suppressed as repeats.
pub static ALERTS_SUPPRESSED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "polywatch_alerts_suppressed_total",
        "Alerts suppressed as already emitted"
    )
    .unwrap()
});

/// Alert deliveries.
/// Labels: notifier, outcome (delivered/failed)
pub static ALERT_DELIVERIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "polywatch_alert_deliveries_total",
        "Alert delivery outcomes",
        &["notifier", "outcome"]
    )
    .unwrap()
});

/// Trades currently being enriched or evaluated.
pub static WORKERS_INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "polywatch_workers_inflight",
        "Trades currently in enrichment or evaluation"
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn trade_ingested() {
        TRADES_INGESTED_TOTAL.inc();
    }

    pub fn trade_duplicate() {
        TRADES_DUPLICATE_TOTAL.inc();
    }

    pub fn trade_dropped(reason: &str) {
        TRADES_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn ingest_cursor(unix_secs: i64) {
        INGEST_CURSOR.set(unix_secs);
    }

    /// Record a cache lookup outcome.
    pub fn cache_lookup(cache: &str, outcome: &str) {
        CACHE_LOOKUPS_TOTAL
            .with_label_values(&[cache, outcome])
            .inc();
    }

    pub fn cache_entries(cache: &str, entries: usize) {
        CACHE_ENTRIES
            .with_label_values(&[cache])
            .set(entries as i64);
    }

    pub fn cache_eviction(cache: &str) {
        CACHE_EVICTIONS_TOTAL.with_label_values(&[cache]).inc();
    }

    pub fn upstream_call(target: &str, outcome: &str) {
        UPSTREAM_CALLS_TOTAL
            .with_label_values(&[target, outcome])
            .inc();
    }

    pub fn upstream_latency(target: &str, latency_ms: f64) {
        UPSTREAM_LATENCY_MS
            .with_label_values(&[target])
            .observe(latency_ms);
    }

    pub fn breaker_state(target: &str, state: i64) {
        BREAKER_STATE.with_label_values(&[target]).set(state);
    }

    pub fn rate_limited(target: &str) {
        RATE_LIMITED_TOTAL.with_label_values(&[target]).inc();
    }

    pub fn pattern_matched(pattern: &str) {
        PATTERN_MATCHES_TOTAL.with_label_values(&[pattern]).inc();
    }

    pub fn verdict(risk: &str) {
        VERDICTS_TOTAL.with_label_values(&[risk]).inc();
    }

    pub fn evaluation_latency(latency_ms: f64) {
        EVALUATION_LATENCY_MS.observe(latency_ms);
    }

    pub fn alert_admitted(risk: &str) {
        ALERTS_ADMITTED_TOTAL.with_label_values(&[risk]).inc();
    }

    pub fn alert_suppressed() {
        ALERTS_SUPPRESSED_TOTAL.inc();
    }

    pub fn alert_delivered(notifier: &str) {
        ALERT_DELIVERIES_TOTAL
            .with_label_values(&[notifier, "delivered"])
            .inc();
    }

    pub fn alert_delivery_failed(notifier: &str) {
        ALERT_DELIVERIES_TOTAL
            .with_label_values(&[notifier, "failed"])
            .inc();
    }

    pub fn worker_started() {
        WORKERS_INFLIGHT.inc();
    }

    pub fn worker_finished() {
        WORKERS_INFLIGHT.dec();
    }

    /// Render the default registry in Prometheus text format.
    pub fn gather_text() -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&prometheus::gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
