//! Application configuration.
//!
//! Loaded once at startup from a TOML file, then overridden by the
//! recognized environment options. The result is immutable and handed to
//! every component through its constructor.

use crate::error::{AppError, AppResult};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, File, FileFormat, Value};
use polywatch_alert::DedupConfig;
use polywatch_context::CacheConfig;
use polywatch_detector::DetectorConfig;
use polywatch_upstream::{GuardConfig, RetryPolicy};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Minimum sizes below this flood the notifier.
const LOW_MIN_TRADE_SIZE_USD: Decimal = Decimal::from_parts(1_000, 0, 0, false, 0);
const FAST_POLL_SECS: u64 = 10;
const HIGH_RATE_LIMIT_RPS: f64 = 10.0;

/// Where trades come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Poll the data API on an interval.
    #[default]
    Poll,
    /// Newline-delimited JSON trades on standard input.
    Stdin,
}

/// Context cache sizing and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachesConfig {
    /// Wallet profile TTL (seconds). Default: 1800.
    #[serde(default = "default_wallet_ttl_secs")]
    pub wallet_ttl_secs: u64,
    /// Market metadata TTL (seconds). Default: 3600.
    #[serde(default = "default_market_ttl_secs")]
    pub market_ttl_secs: u64,
    #[serde(default = "default_wallet_capacity")]
    pub wallet_capacity: usize,
    #[serde(default = "default_market_capacity")]
    pub market_capacity: usize,
}

fn default_wallet_ttl_secs() -> u64 {
    1_800
}

fn default_market_ttl_secs() -> u64 {
    3_600
}

fn default_wallet_capacity() -> usize {
    10_000
}

fn default_market_capacity() -> usize {
    5_000
}

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            wallet_ttl_secs: default_wallet_ttl_secs(),
            market_ttl_secs: default_market_ttl_secs(),
            wallet_capacity: default_wallet_capacity(),
            market_capacity: default_market_capacity(),
        }
    }
}

impl CachesConfig {
    pub fn wallet_cache(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.wallet_capacity,
            ttl: secs(self.wallet_ttl_secs),
        }
    }

    pub fn market_cache(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.market_capacity,
            ttl: secs(self.market_ttl_secs),
        }
    }
}

fn secs(value: u64) -> chrono::Duration {
    let max = i64::MAX / 1_000;
    chrono::Duration::seconds(i64::try_from(value).map_or(max, |v| v.min(max)))
}

/// Protection applied to every upstream target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Token bucket refill rate per target. Default: 2.
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
    /// Longest wait for a rate-limit token (ms). Default: 10,000.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Consecutive failures that open the breaker. Default: 3.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// Open-state duration (seconds). Default: 30.
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
    /// Per-attempt timeout (seconds). Default: 30.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_rate_limit_rps() -> f64 {
    2.0
}

fn default_acquire_timeout_ms() -> u64 {
    10_000
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_breaker_cooldown_secs() -> u64 {
    30
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            rate_limit_rps: default_rate_limit_rps(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl UpstreamConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            rate_limit_rps: self.rate_limit_rps,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            breaker_threshold: self.breaker_threshold,
            breaker_cooldown: Duration::from_secs(self.breaker_cooldown_secs),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            retry: self.retry_policy(),
        }
    }
}

/// Upstream endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Trades and wallet history.
    #[serde(default = "default_data_api_url")]
    pub data_api_url: String,
    /// Market metadata.
    #[serde(default = "default_gamma_api_url")]
    pub gamma_api_url: String,
    /// Optional funding-event endpoint. Without it wallets carry no funding history.
    #[serde(default)]
    pub funding_url: Option<String>,
    /// Historical trades fetched per wallet. Default: 100.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

fn default_data_api_url() -> String {
    "https://data-api.polymarket.com".to_string()
}

fn default_gamma_api_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_history_limit() -> u32 {
    100
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            data_api_url: default_data_api_url(),
            gamma_api_url: default_gamma_api_url(),
            funding_url: None,
            history_limit: default_history_limit(),
        }
    }
}

/// Trade ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub source: SourceKind,
    /// Poll interval (seconds). Default: 60.
    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,
    /// Trades requested per poll. Default: 500.
    #[serde(default = "default_trade_limit")]
    pub trade_limit: u32,
    /// Ask the API to drop trades below the minimum size. Default: true.
    #[serde(default = "default_server_side_filter")]
    pub server_side_filter: bool,
    /// Recently seen trade ids kept for dedup. Default: 50,000.
    #[serde(default = "default_ingest_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Push channel buffer. Default: 1,024.
    #[serde(default = "default_push_buffer")]
    pub push_buffer: usize,
}

fn default_polling_interval_secs() -> u64 {
    60
}

fn default_trade_limit() -> u32 {
    500
}

fn default_server_side_filter() -> bool {
    true
}

fn default_ingest_dedup_capacity() -> usize {
    50_000
}

fn default_push_buffer() -> usize {
    1_024
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            polling_interval_secs: default_polling_interval_secs(),
            trade_limit: default_trade_limit(),
            server_side_filter: default_server_side_filter(),
            dedup_capacity: default_ingest_dedup_capacity(),
            push_buffer: default_push_buffer(),
        }
    }
}

impl FeedConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }
}

/// Alert dedup and delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Default: 24.
    #[serde(default = "default_dedup_window_hours")]
    pub dedup_window_hours: u32,
    /// Default: 50,000.
    #[serde(default = "default_alert_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Write every alert to the log. Default: true.
    #[serde(default = "default_log_alerts")]
    pub log_alerts: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    /// Delivery attempts per notifier, including the first. Default: 3.
    #[serde(default = "default_delivery_attempts")]
    pub delivery_attempts: u32,
    /// Time given to queued alerts on shutdown (seconds). Default: 10.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_dedup_window_hours() -> u32 {
    24
}

fn default_alert_dedup_capacity() -> usize {
    50_000
}

fn default_log_alerts() -> bool {
    true
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_delivery_attempts() -> u32 {
    3
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_window_hours: default_dedup_window_hours(),
            dedup_capacity: default_alert_dedup_capacity(),
            log_alerts: default_log_alerts(),
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout_secs(),
            delivery_attempts: default_delivery_attempts(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl AlertConfig {
    pub fn dedup_config(&self) -> DedupConfig {
        DedupConfig {
            window: chrono::Duration::hours(i64::from(self.dedup_window_hours)),
            capacity: self.dedup_capacity,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.delivery_attempts,
            ..RetryPolicy::default()
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Worker pool and housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Trades enriched and evaluated concurrently. Default: 8.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Statistics summary interval (seconds). Default: 3600.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_worker_count() -> usize {
    8
}

fn default_stats_interval_secs() -> u64 {
    3_600
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Detection thresholds. `min_trade_size_usd` is required.
    pub detector: DetectorConfig,
    #[serde(default)]
    pub cache: CachesConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Decimal,
    Integer,
    Float,
}

/// Recognized environment options and the keys they override.
const ENV_OVERRIDES: [(&str, &str, EnvKind); 9] = [
    ("MIN_TRADE_SIZE_USD", "detector.min_trade_size_usd", EnvKind::Decimal),
    ("FUNDING_LOOKBACK_HOURS", "detector.funding_lookback_hours", EnvKind::Integer),
    ("TRADE_HISTORY_CHECK_DAYS", "detector.trade_history_check_days", EnvKind::Integer),
    ("WALLET_CACHE_TTL", "cache.wallet_ttl_secs", EnvKind::Integer),
    ("MARKET_CACHE_TTL", "cache.market_ttl_secs", EnvKind::Integer),
    ("POLLING_INTERVAL", "feed.polling_interval_secs", EnvKind::Integer),
    ("RATE_LIMIT_RPS", "upstream.rate_limit_rps", EnvKind::Float),
    ("CIRCUIT_BREAKER_THRESHOLD", "upstream.breaker_threshold", EnvKind::Integer),
    ("CIRCUIT_BREAKER_COOLDOWN", "upstream.breaker_cooldown_secs", EnvKind::Integer),
];

fn typed_value(var: &str, raw: &str, kind: EnvKind) -> AppResult<Value> {
    let raw = raw.trim();
    let invalid = |expected: &str| AppError::Config(format!("{var}={raw:?} is not {expected}"));
    match kind {
        EnvKind::Decimal => raw
            .parse::<Decimal>()
            .map(|d| Value::from(d.to_string()))
            .map_err(|_| invalid("a decimal number")),
        EnvKind::Integer => raw
            .parse::<u32>()
            .map(|n| Value::from(i64::from(n)))
            .map_err(|_| invalid("a non-negative integer")),
        EnvKind::Float => match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Value::from(f)),
            _ => Err(invalid("a finite number")),
        },
    }
}

impl AppConfig {
    /// Load from `path` (when it exists) plus the process environment.
    pub fn load(path: &str) -> AppResult<Self> {
        let mut builder = Config::builder();
        if Path::new(path).exists() {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            warn!(path = %path, "Config file not found, using defaults and environment");
        }
        Self::assemble(builder, |var| std::env::var(var).ok())
    }

    /// Parse TOML text, applying overrides from `env`.
    pub fn from_toml_str(text: &str, env: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let builder = Config::builder().add_source(File::from_str(text, FileFormat::Toml));
        Self::assemble(builder, env)
    }

    fn assemble(
        mut builder: ConfigBuilder<DefaultState>,
        env: impl Fn(&str) -> Option<String>,
    ) -> AppResult<Self> {
        for (var, key, kind) in ENV_OVERRIDES {
            if let Some(raw) = env(var) {
                builder = builder
                    .set_override(key, typed_value(var, &raw, kind)?)
                    .map_err(|e| AppError::Config(format!("Failed to apply {var}: {e}")))?;
            }
        }
        let merged = builder
            .build()
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        if merged.get_string("detector.min_trade_size_usd").is_err() {
            return Err(AppError::Config(
                "detector.min_trade_size_usd (MIN_TRADE_SIZE_USD) is required".to_string(),
            ));
        }

        merged
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject values the pipeline cannot run with; log questionable ones.
    pub fn validate(&self) -> AppResult<()> {
        self.detector
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let checks: [(bool, &str); 14] = [
            (self.cache.wallet_ttl_secs == 0, "cache.wallet_ttl_secs must be positive"),
            (self.cache.market_ttl_secs == 0, "cache.market_ttl_secs must be positive"),
            (self.cache.wallet_capacity == 0, "cache.wallet_capacity must be positive"),
            (self.cache.market_capacity == 0, "cache.market_capacity must be positive"),
            (
                !(self.upstream.rate_limit_rps.is_finite() && self.upstream.rate_limit_rps > 0.0),
                "upstream.rate_limit_rps must be positive",
            ),
            (self.upstream.breaker_threshold == 0, "upstream.breaker_threshold must be at least 1"),
            (self.upstream.call_timeout_secs == 0, "upstream.call_timeout_secs must be positive"),
            (self.upstream.retry_max_attempts == 0, "upstream.retry_max_attempts must be at least 1"),
            (self.feed.polling_interval_secs == 0, "feed.polling_interval_secs must be positive"),
            (self.feed.dedup_capacity == 0, "feed.dedup_capacity must be positive"),
            (self.alert.dedup_capacity == 0, "alert.dedup_capacity must be positive"),
            (self.alert.delivery_attempts == 0, "alert.delivery_attempts must be at least 1"),
            (self.runtime.worker_count == 0, "runtime.worker_count must be at least 1"),
            (
                self.providers.data_api_url.trim().is_empty()
                    || self.providers.gamma_api_url.trim().is_empty(),
                "providers.data_api_url and providers.gamma_api_url must be set",
            ),
        ];
        if let Some((_, message)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(AppError::Config((*message).to_string()));
        }
        for (field, url) in [
            ("providers.funding_url", &self.providers.funding_url),
            ("alert.webhook_url", &self.alert.webhook_url),
        ] {
            if url.as_deref().is_some_and(|u| u.trim().is_empty()) {
                return Err(AppError::Config(format!("{field} is set but empty")));
            }
        }

        for warning in self.warnings() {
            warn!("{warning}");
        }
        Ok(())
    }

    /// Settings that are valid but probably not intended.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.detector.min_trade_size_usd.inner() < LOW_MIN_TRADE_SIZE_USD {
            warnings.push(format!(
                "min_trade_size_usd ({}) is very low; expect a high alert volume",
                self.detector.min_trade_size_usd
            ));
        }
        if self.feed.source == SourceKind::Poll && self.feed.polling_interval_secs < FAST_POLL_SECS {
            warnings.push(format!(
                "polling_interval_secs ({}) is under {FAST_POLL_SECS}s",
                self.feed.polling_interval_secs
            ));
        }
        if self.upstream.rate_limit_rps > HIGH_RATE_LIMIT_RPS {
            warnings.push(format!(
                "rate_limit_rps ({}) is above {HIGH_RATE_LIMIT_RPS}; upstream APIs may throttle",
                self.upstream.rate_limit_rps
            ));
        }
        warnings
    }
}
