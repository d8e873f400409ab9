//! Cached, guarded context lookups used by the enrichment step.
//!
//! Resolution never fails: a failed refresh falls back to the stale value,
//! and a key that was never fetched resolves to a placeholder with
//! [`ContextStatus::Unknown`].

use crate::cache::{CacheConfig, ContextCache, Snapshot};
use crate::provider::{MarketProvider, WalletProvider};
use polywatch_core::{Clock, ContextStatus, MarketId, MarketInfo, WalletAddress, WalletProfile};
use polywatch_telemetry::Metrics;
use polywatch_upstream::{GuardConfig, UpstreamError, UpstreamGuard};
use std::sync::Arc;
use tracing::warn;

/// Wallet profiles: cache + guarded provider.
pub struct WalletContext {
    cache: ContextCache<WalletAddress, WalletProfile>,
    provider: Arc<dyn WalletProvider>,
    guard: UpstreamGuard,
    clock: Arc<dyn Clock>,
}

impl WalletContext {
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        cache: CacheConfig,
        guard: GuardConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: ContextCache::new("wallet", cache, Arc::clone(&clock)),
            guard: UpstreamGuard::new(provider.target(), guard, Arc::clone(&clock)),
            provider,
            clock,
        }
    }

    pub async fn resolve(&self, address: &WalletAddress) -> Snapshot<WalletProfile> {
        let result = self
            .cache
            .get(address, |previous| async move {
                let mut profile = self
                    .guard
                    .call(|| self.provider.fetch_wallet(address))
                    .await?;
                profile.address = address.clone();
                profile.cached_at = self.clock.now();

                if let Some(previous) = previous {
                    let reported = profile.first_seen_at;
                    if profile.retain_earliest_first_seen(previous.first_seen_at) {
                        warn!(
                            wallet = %address,
                            previous = ?previous.first_seen_at,
                            reported = ?reported,
                            "Refresh reported a later first_seen_at, keeping the earlier value"
                        );
                    }
                }
                Ok::<_, UpstreamError>(profile)
            })
            .await;

        match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(wallet = %address, error = %e, "Wallet context unavailable, using unknown profile");
                Metrics::cache_lookup(self.cache.name(), "unknown");
                let now = self.clock.now();
                Snapshot {
                    value: Arc::new(WalletProfile::unknown(address.clone(), now)),
                    cached_at: now,
                    status: ContextStatus::Unknown,
                }
            }
        }
    }

    pub fn cache(&self) -> &ContextCache<WalletAddress, WalletProfile> {
        &self.cache
    }

    pub fn guard(&self) -> &UpstreamGuard {
        &self.guard
    }
}

/// Market metadata: cache + guarded provider.
pub struct MarketContext {
    cache: ContextCache<MarketId, MarketInfo>,
    provider: Arc<dyn MarketProvider>,
    guard: UpstreamGuard,
    clock: Arc<dyn Clock>,
}

impl MarketContext {
    pub fn new(
        provider: Arc<dyn MarketProvider>,
        cache: CacheConfig,
        guard: GuardConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: ContextCache::new("market", cache, Arc::clone(&clock)),
            guard: UpstreamGuard::new(provider.target(), guard, Arc::clone(&clock)),
            provider,
            clock,
        }
    }

    pub async fn resolve(&self, market_id: &MarketId) -> Snapshot<MarketInfo> {
        let result = self
            .cache
            .get(market_id, |_| async move {
                let mut info = self
                    .guard
                    .call(|| self.provider.fetch_market(market_id))
                    .await?;
                info.market_id = market_id.clone();
                info.cached_at = self.clock.now();
                Ok::<_, UpstreamError>(info)
            })
            .await;

        match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(market = %market_id, error = %e, "Market context unavailable, using unknown market");
                Metrics::cache_lookup(self.cache.name(), "unknown");
                let now = self.clock.now();
                Snapshot {
                    value: Arc::new(MarketInfo::unknown(market_id.clone(), now)),
                    cached_at: now,
                    status: ContextStatus::Unknown,
                }
            }
        }
    }

    pub fn cache(&self) -> &ContextCache<MarketId, MarketInfo> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockMarketProvider, MockWalletProvider};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use polywatch_core::{ManualClock, UsdAmount};
    use polywatch_upstream::{CircuitState, RetryPolicy};
    use rust_decimal_macros::dec;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 5, 12, 0, 0).unwrap()
    }

    fn guard_config() -> GuardConfig {
        GuardConfig {
            rate_limit_rps: 1000.0,
            acquire_timeout: std::time::Duration::from_millis(100),
            breaker_threshold: 2,
            breaker_cooldown: std::time::Duration::from_secs(30),
            call_timeout: std::time::Duration::from_secs(1),
            retry: RetryPolicy::none(),
        }
    }

    fn cache_config() -> CacheConfig {
        CacheConfig {
            capacity: 100,
            ttl: Duration::seconds(1800),
        }
    }

    fn profile(first_seen: DateTime<Utc>) -> WalletProfile {
        WalletProfile {
            address: WalletAddress::new("0xaaa"),
            first_seen_at: Some(first_seen),
            trade_count: 2,
            total_volume_usd: UsdAmount::new(dec!(1000)),
            recent_funding_events: vec![],
            recent_trades: vec![],
            cached_at: start(),
        }
    }

    fn wallet_context(
        provider: Arc<MockWalletProvider>,
        clock: Arc<ManualClock>,
    ) -> WalletContext {
        WalletContext::new(provider, cache_config(), guard_config(), clock)
    }

    #[tokio::test]
    async fn test_unknown_profile_when_never_fetched() {
        let clock = Arc::new(ManualClock::new(start()));
        let provider = Arc::new(MockWalletProvider::new());
        provider.fail_next(1);
        let ctx = wallet_context(provider, clock);

        let snapshot = ctx.resolve(&WalletAddress::new("0xaaa")).await;
        assert_eq!(snapshot.status, ContextStatus::Unknown);
        assert_eq!(snapshot.value.trade_count, 0);
        assert_eq!(snapshot.value.first_seen_at, None);
    }

    #[tokio::test]
    async fn test_stale_profile_when_refresh_fails() {
        let clock = Arc::new(ManualClock::new(start()));
        let provider = Arc::new(
            MockWalletProvider::new().with_profile(profile(start() - Duration::days(5))),
        );
        let ctx = wallet_context(Arc::clone(&provider), clock.clone());
        let addr = WalletAddress::new("0xaaa");

        assert_eq!(ctx.resolve(&addr).await.status, ContextStatus::Fresh);

        clock.advance(Duration::seconds(1800));
        provider.fail_next(1);
        let snapshot = ctx.resolve(&addr).await;
        assert_eq!(snapshot.status, ContextStatus::Stale);
        assert_eq!(snapshot.value.trade_count, 2);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_first_seen_is_monotone_across_refreshes() {
        let clock = Arc::new(ManualClock::new(start()));
        let earliest = start() - Duration::days(5);
        let provider = Arc::new(MockWalletProvider::new().with_profile(profile(earliest)));
        let ctx = wallet_context(Arc::clone(&provider), clock.clone());
        let addr = WalletAddress::new("0xaaa");
        ctx.resolve(&addr).await;

        // Upstream now claims the wallet appeared later.
        provider.set_profile(profile(start() - Duration::hours(1)));
        clock.advance(Duration::seconds(1800));
        let snapshot = ctx.resolve(&addr).await;

        assert_eq!(snapshot.status, ContextStatus::Fresh);
        assert_eq!(snapshot.value.first_seen_at, Some(earliest));
    }

    #[tokio::test]
    async fn test_open_circuit_degrades_to_unknown_without_calls() {
        let clock = Arc::new(ManualClock::new(start()));
        let provider = Arc::new(MockWalletProvider::new());
        provider.fail_next(10);
        let ctx = wallet_context(Arc::clone(&provider), clock);

        ctx.resolve(&WalletAddress::new("0x1")).await;
        ctx.resolve(&WalletAddress::new("0x2")).await;
        assert_eq!(ctx.guard().breaker_state(), CircuitState::Open);

        let snapshot = ctx.resolve(&WalletAddress::new("0x3")).await;
        assert_eq!(snapshot.status, ContextStatus::Unknown);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_market_resolution_and_unknown() {
        let clock = Arc::new(ManualClock::new(start()));
        let provider = Arc::new(MockMarketProvider::new().with_market(MarketInfo {
            market_id: MarketId::new("m1"),
            question: "Will it rain?".to_string(),
            expires_at: Some(start() + Duration::days(2)),
            cached_at: start(),
        }));
        let ctx = MarketContext::new(
            Arc::clone(&provider) as Arc<dyn MarketProvider>,
            cache_config(),
            guard_config(),
            clock,
        );

        let known = ctx.resolve(&MarketId::new("m1")).await;
        assert_eq!(known.status, ContextStatus::Fresh);
        assert_eq!(known.value.question, "Will it rain?");

        // Served from cache.
        ctx.resolve(&MarketId::new("m1")).await;
        assert_eq!(provider.call_count(), 1);

        let missing = ctx.resolve(&MarketId::new("m2")).await;
        assert_eq!(missing.status, ContextStatus::Unknown);
        assert!(missing.value.expires_at.is_none());
    }
}
