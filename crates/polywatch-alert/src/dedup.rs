//! Alert deduplication.
//!
//! Distinct from ingest dedup: the ingestor drops replayed raw trades,
//! while this drops repeat alerts for a trade that was evaluated again
//! (for example after a cache refresh changed its verdict). A trade that
//! already alerted is never re-alerted inside the window, whatever its
//! patterns are now.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use polywatch_core::{Clock, PatternTag, TradeId};
use polywatch_telemetry::Metrics;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Window bounds; whichever is hit first expires an entry.
#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub window: Duration,
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::hours(24),
            capacity: 50_000,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Admission order, oldest first.
    order: VecDeque<(TradeId, DateTime<Utc>)>,
    alerted: HashMap<TradeId, BTreeSet<PatternTag>>,
}

impl Inner {
    fn expire(&mut self, cutoff: DateTime<Utc>) {
        while let Some((_, admitted_at)) = self.order.front() {
            if *admitted_at > cutoff {
                break;
            }
            if let Some((id, _)) = self.order.pop_front() {
                self.alerted.remove(&id);
            }
        }
    }

    fn evict_to(&mut self, capacity: usize) {
        while self.order.len() > capacity {
            if let Some((id, _)) = self.order.pop_front() {
                self.alerted.remove(&id);
            }
        }
    }
}

/// Remembers which trades already produced an alert.
pub struct AlertDeduplicator {
    config: DedupConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl AlertDeduplicator {
    pub fn new(config: DedupConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: DedupConfig {
                capacity: config.capacity.max(1),
                ..config
            },
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Returns `true` the first time `trade_id` is seen within the window.
    pub fn admit(&self, trade_id: &TradeId, patterns: &BTreeSet<PatternTag>) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.expire(now - self.config.window);

        if let Some(previous) = inner.alerted.get(trade_id) {
            debug!(
                %trade_id,
                previous = ?previous,
                current = ?patterns,
                "Alert already sent for trade, suppressing"
            );
            Metrics::alert_suppressed();
            return false;
        }

        inner.order.push_back((trade_id.clone(), now));
        inner.alerted.insert(trade_id.clone(), patterns.clone());
        inner.evict_to(self.config.capacity);
        true
    }

    /// Patterns recorded when `trade_id` was admitted.
    pub fn patterns_for(&self, trade_id: &TradeId) -> Option<BTreeSet<PatternTag>> {
        self.inner.lock().alerted.get(trade_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use polywatch_core::ManualClock;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 11, 5, 12, 0, 0).unwrap(),
        ))
    }

    fn tags(list: &[PatternTag]) -> BTreeSet<PatternTag> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_second_verdict_for_same_trade_rejected() {
        let dedup = AlertDeduplicator::new(DedupConfig::default(), clock());
        let id = TradeId::new("0xabc", 3);

        assert!(dedup.admit(&id, &tags(&[PatternTag::NewWalletLargeTrade])));
        assert!(!dedup.admit(
            &id,
            &tags(&[PatternTag::NewWalletLargeTrade, PatternTag::FundingProximity])
        ));
        assert_eq!(
            dedup.patterns_for(&id),
            Some(tags(&[PatternTag::NewWalletLargeTrade]))
        );
        assert!(dedup.admit(&TradeId::new("0xabc", 4), &tags(&[PatternTag::UnusualSize])));
    }

    #[test]
    fn test_entry_expires_after_window() {
        let clock = clock();
        let dedup = AlertDeduplicator::new(DedupConfig::default(), clock.clone());
        let id = TradeId::new("0xabc", 3);
        let patterns = tags(&[PatternTag::ExpiringMarket]);

        assert!(dedup.admit(&id, &patterns));
        clock.advance(Duration::hours(23));
        assert!(!dedup.admit(&id, &patterns));
        clock.advance(Duration::hours(1));
        assert!(dedup.admit(&id, &patterns));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let dedup = AlertDeduplicator::new(
            DedupConfig {
                window: Duration::hours(24),
                capacity: 2,
            },
            clock(),
        );
        let patterns = tags(&[PatternTag::SuddenActivity]);
        let (a, b, c) = (TradeId::new("0xa", 0), TradeId::new("0xb", 0), TradeId::new("0xc", 0));

        assert!(dedup.admit(&a, &patterns));
        assert!(dedup.admit(&b, &patterns));
        assert!(dedup.admit(&c, &patterns));
        assert_eq!(dedup.len(), 2);
        assert!(dedup.admit(&a, &patterns));
        assert!(!dedup.admit(&c, &patterns));
    }
}
