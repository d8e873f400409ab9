//! Context provider abstraction.
//!
//! Providers perform the raw upstream lookup. Rate limiting, circuit
//! breaking, retries and caching are layered on top by the resolvers.

use parking_lot::Mutex;
use polywatch_core::{BoxFuture, MarketId, MarketInfo, WalletAddress, WalletProfile};
use polywatch_upstream::{UpstreamError, UpstreamResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Source of wallet history.
pub trait WalletProvider: Send + Sync {
    /// Upstream target name used for guards, logs and metrics.
    fn target(&self) -> &str;

    /// Trade count, volume, first-seen time, recent trades and funding.
    fn fetch_wallet<'a>(
        &'a self,
        address: &'a WalletAddress,
    ) -> BoxFuture<'a, UpstreamResult<WalletProfile>>;
}

/// Source of market metadata.
pub trait MarketProvider: Send + Sync {
    fn target(&self) -> &str;

    /// Question text and expiry time.
    fn fetch_market<'a>(&'a self, market_id: &'a MarketId)
        -> BoxFuture<'a, UpstreamResult<MarketInfo>>;
}

/// In-memory wallet provider for tests and dry runs.
///
/// Unknown addresses resolve to `NotFound`. Failures can be injected.
#[derive(Default)]
pub struct MockWalletProvider {
    profiles: Mutex<HashMap<WalletAddress, WalletProfile>>,
    calls: Mutex<Vec<WalletAddress>>,
    /// Number of upcoming calls that fail with a transient error.
    failures: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

impl MockWalletProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, profile: WalletProfile) -> Self {
        self.set_profile(profile);
        self
    }

    pub fn set_profile(&self, profile: WalletProfile) {
        self.profiles.lock().insert(profile.address.clone(), profile);
    }

    /// Fail the next `n` calls.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<WalletAddress> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl WalletProvider for MockWalletProvider {
    fn target(&self) -> &str {
        "mock_wallet"
    }

    fn fetch_wallet<'a>(
        &'a self,
        address: &'a WalletAddress,
    ) -> BoxFuture<'a, UpstreamResult<WalletProfile>> {
        Box::pin(async move {
            self.calls.lock().push(address.clone());
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if take_failure(&self.failures) {
                return Err(UpstreamError::Transient {
                    target: self.target().to_string(),
                    message: "injected failure".to_string(),
                });
            }
            self.profiles
                .lock()
                .get(address)
                .cloned()
                .ok_or_else(|| UpstreamError::NotFound {
                    target: self.target().to_string(),
                    key: address.to_string(),
                })
        })
    }
}

/// In-memory market provider for tests and dry runs.
#[derive(Default)]
pub struct MockMarketProvider {
    markets: Mutex<HashMap<MarketId, MarketInfo>>,
    calls: Mutex<Vec<MarketId>>,
    failures: AtomicU32,
}

impl MockMarketProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_market(self, market: MarketInfo) -> Self {
        self.markets.lock().insert(market.market_id.clone(), market);
        self
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl MarketProvider for MockMarketProvider {
    fn target(&self) -> &str {
        "mock_market"
    }

    fn fetch_market<'a>(
        &'a self,
        market_id: &'a MarketId,
    ) -> BoxFuture<'a, UpstreamResult<MarketInfo>> {
        Box::pin(async move {
            self.calls.lock().push(market_id.clone());
            if take_failure(&self.failures) {
                return Err(UpstreamError::Transient {
                    target: self.target().to_string(),
                    message: "injected failure".to_string(),
                });
            }
            self.markets
                .lock()
                .get(market_id)
                .cloned()
                .ok_or_else(|| UpstreamError::NotFound {
                    target: self.target().to_string(),
                    key: market_id.to_string(),
                })
        })
    }
}

/// Consume one injected failure, if any remain.
fn take_failure(failures: &AtomicU32) -> bool {
    failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
