//! Trades, wallets, markets and an application harness.

use chrono::{DateTime, Duration, TimeZone, Utc};
use polywatch_alert::{Notifier, RecordingNotifier};
use polywatch_bot::{AppConfig, Application, Collaborators};
use polywatch_context::{MockMarketProvider, MockWalletProvider};
use polywatch_core::{
    FundingEvent, HistoricalTrade, ManualClock, MarketId, MarketInfo, TradeSide, UsdAmount,
    WalletAddress, WalletProfile,
};
use polywatch_feed::RawTrade;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;

pub const INSIDER: &str = "0xinsider";
pub const VETERAN: &str = "0xveteran";
pub const ELECTION: &str = "0xelection";
pub const CLOSING: &str = "0xclosing";

/// Time the scenario trades execute at.
pub fn trade_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 5, 12, 0, 0).unwrap()
}

/// Thresholds for tests: $10,000 minimum, fast retries, generous rate limit.
pub fn test_config() -> AppConfig {
    let config = AppConfig::from_toml_str(
        r#"
[detector]
min_trade_size_usd = "10000"

[upstream]
rate_limit_rps = 1000.0
acquire_timeout_ms = 1000
call_timeout_secs = 2
retry_max_attempts = 2
retry_initial_delay_ms = 1
retry_max_delay_ms = 5

[feed]
polling_interval_secs = 1
push_buffer = 64

[alert]
log_alerts = false
shutdown_grace_secs = 2

[runtime]
worker_count = 4
"#,
        |_| None,
    )
    .unwrap();
    config.validate().unwrap();
    config
}

/// Wallet created two hours before its first large trade, funded one hour before.
pub fn insider_wallet() -> WalletProfile {
    let t = trade_time();
    WalletProfile {
        address: WalletAddress::new(INSIDER),
        first_seen_at: Some(t - Duration::hours(2)),
        trade_count: 1,
        total_volume_usd: UsdAmount::new(dec!(20000)),
        recent_funding_events: vec![FundingEvent {
            amount_usd: UsdAmount::new(dec!(480000)),
            timestamp: t - Duration::hours(1),
        }],
        recent_trades: vec![HistoricalTrade {
            market_id: MarketId::new("0xother"),
            side: TradeSide::Buy,
            size_usd: UsdAmount::new(dec!(20000)),
            occurred_at: t - Duration::minutes(90),
        }],
        cached_at: t,
    }
}

/// Long-lived, diversified wallet trading small amounts.
pub fn veteran_wallet() -> WalletProfile {
    let t = trade_time();
    WalletProfile {
        address: WalletAddress::new(VETERAN),
        first_seen_at: Some(t - Duration::days(400)),
        trade_count: 300,
        total_volume_usd: UsdAmount::new(dec!(600000)),
        recent_funding_events: vec![],
        recent_trades: (0..12)
            .map(|i| HistoricalTrade {
                market_id: MarketId::new(&format!("0xmarket{i}")),
                side: if i % 2 == 0 { TradeSide::Buy } else { TradeSide::Sell },
                size_usd: UsdAmount::new(dec!(2000)),
                occurred_at: t - Duration::days(i + 1),
            })
            .collect(),
        cached_at: t,
    }
}

pub fn market(id: &str, question: &str, expires_in: Duration) -> MarketInfo {
    MarketInfo {
        market_id: MarketId::new(id),
        question: question.to_string(),
        expires_at: Some(trade_time() + expires_in),
        cached_at: trade_time(),
    }
}

/// Wire record as an event source would deliver it.
pub fn raw_trade(tx: &str, wallet: &str, market: &str, usd: &str, side: &str) -> RawTrade {
    RawTrade {
        transaction_hash: Some(tx.to_string()),
        log_index: Some(0),
        market_id: Some(market.to_string()),
        wallet_address: Some(wallet.to_string()),
        side: Some(side.to_string()),
        outcome: Some("Yes".to_string()),
        size_usd: Some(json!(usd)),
        size: None,
        price: Some(json!("0.62")),
        fee_usd: None,
        timestamp: Some(json!(trade_time().timestamp())),
    }
}

/// The $482,414.91 buy from a two-hour-old, freshly funded wallet.
pub fn insider_trade(tx: &str) -> RawTrade {
    raw_trade(tx, INSIDER, ELECTION, "482414.91", "BUY")
}

/// In-memory collaborators with handles kept for assertions.
pub struct Harness {
    pub wallets: Arc<MockWalletProvider>,
    pub markets: Arc<MockMarketProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Insider and veteran wallets, a long-dated and a closing market.
    pub fn new() -> Self {
        Self::with_providers(
            MockWalletProvider::new()
                .with_profile(insider_wallet())
                .with_profile(veteran_wallet()),
            MockMarketProvider::new()
                .with_market(market(ELECTION, "Will candidate X win?", Duration::days(90)))
                .with_market(market(CLOSING, "Will the bill pass this week?", Duration::days(3))),
        )
    }

    pub fn with_providers(wallets: MockWalletProvider, markets: MockMarketProvider) -> Self {
        Self {
            wallets: Arc::new(wallets),
            markets: Arc::new(markets),
            notifier: Arc::new(RecordingNotifier::new()),
            clock: Arc::new(ManualClock::new(trade_time() + Duration::minutes(1))),
        }
    }

    pub fn app(&self) -> Application {
        self.app_with(test_config())
    }

    pub fn app_with(&self, config: AppConfig) -> Application {
        Application::with_collaborators(
            config,
            Collaborators {
                wallets: self.wallets.clone(),
                markets: self.markets.clone(),
                notifiers: vec![self.notifier.clone() as Arc<dyn Notifier>],
                clock: self.clock.clone(),
            },
        )
        .unwrap()
    }
}
