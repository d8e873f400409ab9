//! Time-bounded, size-bounded context cache.
//!
//! One generic design backs both the wallet and the market cache:
//! - an entry is fresh while `now < cached_at + ttl`
//! - on overflow the least recently used entry is evicted
//! - a miss or expiry triggers one upstream fetch per key; concurrent
//!   lookups of the same key wait for that fetch instead of issuing their own
//! - a failed refresh serves the last known value flagged as stale
//!
//! The arena lock is never held across an await, so a slow refresh of one
//! key never blocks reads of another.

use crate::arena::LruArena;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use polywatch_core::{Clock, ContextStatus};
use polywatch_telemetry::Metrics;
use polywatch_upstream::UpstreamResult;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// Cache sizing and expiry.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

/// Read-only view of a cached value.
#[derive(Debug)]
pub struct Snapshot<V> {
    pub value: Arc<V>,
    pub cached_at: DateTime<Utc>,
    pub status: ContextStatus,
}

impl<V> Clone for Snapshot<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            cached_at: self.cached_at,
            status: self.status,
        }
    }
}

struct Entry<V> {
    value: Arc<V>,
    cached_at: DateTime<Utc>,
}

/// TTL + LRU cache with per-key single-flight refresh.
pub struct ContextCache<K, V> {
    name: &'static str,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    arena: Mutex<LruArena<K, Entry<V>>>,
    inflight: DashMap<K, Arc<tokio::sync::Mutex<()>>>,
}

impl<K, V> ContextCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    pub fn new(name: &'static str, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            ttl: config.ttl,
            clock,
            arena: Mutex::new(LruArena::new(config.capacity)),
            inflight: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.arena.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, cached_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now < cached_at + self.ttl
    }

    /// Fresh value for `key`, touching its recency. Never fetches.
    pub fn get_fresh(&self, key: &K) -> Option<Snapshot<V>> {
        let now = self.clock.now();
        let mut arena = self.arena.lock();
        let entry = arena.get(key)?;
        if !self.is_fresh(entry.cached_at, now) {
            return None;
        }
        Some(Snapshot {
            value: Arc::clone(&entry.value),
            cached_at: entry.cached_at,
            status: ContextStatus::Fresh,
        })
    }

    /// Any cached value for `key`, fresh or not, without touching recency.
    pub fn peek(&self, key: &K) -> Option<Snapshot<V>> {
        let now = self.clock.now();
        let arena = self.arena.lock();
        let entry = arena.peek(key)?;
        let status = if self.is_fresh(entry.cached_at, now) {
            ContextStatus::Fresh
        } else {
            ContextStatus::Stale
        };
        Some(Snapshot {
            value: Arc::clone(&entry.value),
            cached_at: entry.cached_at,
            status,
        })
    }

    /// Store `value` as fetched now.
    pub fn insert(&self, key: K, value: V) -> Snapshot<V> {
        let now = self.clock.now();
        let value = Arc::new(value);
        let (evicted, len) = {
            let mut arena = self.arena.lock();
            let evicted = arena.insert(
                key,
                Entry {
                    value: Arc::clone(&value),
                    cached_at: now,
                },
            );
            (evicted, arena.len())
        };
        if let Some((evicted_key, _)) = evicted {
            debug!(cache = self.name, key = %evicted_key, "Evicted least recently used entry");
            Metrics::cache_eviction(self.name);
        }
        Metrics::cache_entries(self.name, len);
        Snapshot {
            value,
            cached_at: now,
            status: ContextStatus::Fresh,
        }
    }

    pub fn invalidate(&self, key: &K) {
        self.arena.lock().remove(key);
    }

    pub fn clear(&self) {
        self.arena.lock().clear();
        Metrics::cache_entries(self.name, 0);
    }

    /// Return a snapshot for `key`, fetching on miss or expiry.
    ///
    /// `fetch` receives the previously cached value (if any) so callers
    /// can reconcile a refresh with what was known before.
    ///
    /// # Errors
    /// The fetch error, only when it failed and nothing was ever cached
    /// for `key`. Otherwise the last known value is returned as
    /// [`ContextStatus::Stale`].
    pub async fn get<F, Fut>(&self, key: &K, fetch: F) -> UpstreamResult<Snapshot<V>>
    where
        F: FnOnce(Option<Arc<V>>) -> Fut,
        Fut: Future<Output = UpstreamResult<V>>,
    {
        if let Some(snapshot) = self.get_fresh(key) {
            Metrics::cache_lookup(self.name, "hit");
            return Ok(snapshot);
        }

        let gate = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let result = {
            let _guard = gate.lock().await;
            self.refresh_locked(key, fetch).await
        };

        // Drop the gate once no other caller is queued on it.
        self.inflight
            .remove_if(key, |_, g| Arc::strong_count(g) <= 2);
        drop(gate);

        result
    }

    async fn refresh_locked<F, Fut>(&self, key: &K, fetch: F) -> UpstreamResult<Snapshot<V>>
    where
        F: FnOnce(Option<Arc<V>>) -> Fut,
        Fut: Future<Output = UpstreamResult<V>>,
    {
        // Another caller may have refreshed while we waited on the gate.
        if let Some(snapshot) = self.get_fresh(key) {
            Metrics::cache_lookup(self.name, "hit");
            return Ok(snapshot);
        }

        let previous = self.peek(key);
        match fetch(previous.as_ref().map(|s| Arc::clone(&s.value))).await {
            Ok(value) => {
                Metrics::cache_lookup(self.name, "miss");
                Ok(self.insert(key.clone(), value))
            }
            Err(e) => match previous {
                Some(stale) => {
                    debug!(cache = self.name, %key, error = %e, "Refresh failed, serving stale value");
                    Metrics::cache_lookup(self.name, "stale");
                    Ok(Snapshot {
                        status: ContextStatus::Stale,
                        ..stale
                    })
                }
                None => Err(e),
            },
        }
    }
}
