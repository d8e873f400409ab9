//! Trade ingestion.
//!
//! Turns raw events into normalized, never-before-seen trades:
//! - malformed events are dropped with a warning, never fatal
//! - replays and overlapping fetches are dropped silently
//! - the cursor only ever moves forward

use crate::parser::{parse_trade, RawTrade};
use crate::source::TradeSource;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use polywatch_core::{Trade, TradeId};
use polywatch_telemetry::Metrics;
use std::collections::{HashSet, VecDeque};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of trade ids remembered for replay detection.
pub const DEFAULT_DEDUP_CAPACITY: usize = 50_000;

/// Bounded set of recently seen trade ids; the oldest is forgotten first.
#[derive(Debug)]
pub struct SeenTrades {
    order: VecDeque<TradeId>,
    ids: HashSet<TradeId>,
    capacity: usize,
}

impl SeenTrades {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity.min(4096)),
            ids: HashSet::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &TradeId) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.clone());
        self.ids.insert(id.clone());
        true
    }

    pub fn contains(&self, id: &TradeId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Pulls trades from a [`TradeSource`] until cancelled.
pub struct TradeIngestor {
    source: TradeSource,
    seen: SeenTrades,
    cursor: Option<DateTime<Utc>>,
    ticker: Option<Interval>,
    pending: VecDeque<Trade>,
    cancel: CancellationToken,
}

impl TradeIngestor {
    pub fn new(source: TradeSource, dedup_capacity: usize, cancel: CancellationToken) -> Self {
        info!(
            source = source.kind(),
            dedup_capacity, "Trade ingestor created"
        );
        Self {
            source,
            seen: SeenTrades::new(dedup_capacity),
            cursor: None,
            ticker: None,
            pending: VecDeque::new(),
            cancel,
        }
    }

    /// Latest `occurred_at` accepted so far.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }

    pub fn seen(&self) -> &SeenTrades {
        &self.seen
    }

    /// Normalize and deduplicate one raw batch, oldest first.
    pub fn accept_batch(&mut self, raw: Vec<RawTrade>) -> Vec<Trade> {
        let mut accepted = Vec::with_capacity(raw.len());
        for event in raw {
            let trade = match parse_trade(&event) {
                Ok(trade) => trade,
                Err(e) => {
                    warn!(
                        error = %e,
                        tx = ?event.transaction_hash,
                        "Dropping malformed trade"
                    );
                    Metrics::trade_dropped(e.label());
                    continue;
                }
            };
            if !self.seen.insert(&trade.trade_id) {
                debug!(trade_id = %trade.trade_id, "Duplicate trade ignored");
                Metrics::trade_duplicate();
                continue;
            }
            Metrics::trade_ingested();
            accepted.push(trade);
        }

        accepted.sort_by_key(|t| t.occurred_at);
        if let Some(latest) = accepted.last().map(|t| t.occurred_at) {
            if self.cursor.map_or(true, |c| latest > c) {
                self.cursor = Some(latest);
                Metrics::ingest_cursor(latest.timestamp());
            }
        }
        accepted
    }

    /// Wait for the next batch of new trades.
    ///
    /// Returns `None` once cancelled or when a push source closes. A failed
    /// poll yields an empty batch; the next tick retries from the same cursor.
    pub async fn next_batch(&mut self) -> Option<Vec<Trade>> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let raw = match &mut self.source {
            TradeSource::Poll { poller, interval } => {
                let ticker = self.ticker.get_or_insert_with(|| {
                    let mut ticker = tokio::time::interval(*interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker
                });
                tokio::select! {
                    () = self.cancel.cancelled() => return None,
                    _ = ticker.tick() => {}
                }

                match poller.fetch_since(self.cursor).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(
                            upstream = poller.target(),
                            error = %e,
                            cursor = ?self.cursor,
                            "Trade poll failed"
                        );
                        Vec::new()
                    }
                }
            }
            TradeSource::Push(rx) => {
                let first = tokio::select! {
                    () = self.cancel.cancelled() => return None,
                    event = rx.recv() => event?,
                };
                let mut raw = vec![first];
                while let Ok(event) = rx.try_recv() {
                    raw.push(event);
                }
                raw
            }
        };

        Some(self.accept_batch(raw))
    }

    /// Lazy stream of new trades, oldest first within each batch.
    ///
    /// Trades not yet yielded stay buffered in the ingestor, so a dropped
    /// stream can be restarted with another call to `poll`.
    pub fn poll(&mut self) -> impl Stream<Item = Trade> + '_ {
        stream::unfold(self, |ingestor| async move {
            loop {
                if let Some(trade) = ingestor.pending.pop_front() {
                    return Some((trade, ingestor));
                }
                let batch = ingestor.next_batch().await?;
                ingestor.pending.extend(batch);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockTradePoller;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn raw(tx: &str, log_index: u64, ts: i64) -> RawTrade {
        serde_json::from_value(json!({
            "transactionHash": tx,
            "logIndex": log_index,
            "conditionId": "0xmarket",
            "proxyWallet": "0xwallet",
            "side": "BUY",
            "outcome": "Yes",
            "usdSize": "15000",
            "price": "0.4",
            "timestamp": ts
        }))
        .unwrap()
    }

    fn poll_ingestor(poller: Arc<MockTradePoller>) -> TradeIngestor {
        TradeIngestor::new(
            TradeSource::poll(poller, Duration::from_millis(10)),
            DEFAULT_DEDUP_CAPACITY,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_seen_trades_evicts_oldest_first() {
        let mut seen = SeenTrades::new(2);
        let a = TradeId::new("0xa", 0);
        let b = TradeId::new("0xb", 0);
        let c = TradeId::new("0xc", 0);

        assert!(seen.insert(&a));
        assert!(seen.insert(&b));
        assert!(!seen.insert(&a));
        assert!(seen.insert(&c));

        assert_eq!(seen.len(), 2);
        assert!(!seen.contains(&a));
        assert!(seen.contains(&b));
        assert!(seen.insert(&a));
    }

    #[test]
    fn test_accept_batch_dedups_and_orders() {
        let mut ingestor = poll_ingestor(Arc::new(MockTradePoller::new()));
        let batch = ingestor.accept_batch(vec![
            raw("0x2", 0, 1_730_808_060),
            raw("0x1", 0, 1_730_808_000),
            raw("0x1", 0, 1_730_808_000),
            raw("0x1", 1, 1_730_808_000),
        ]);
        let ids: Vec<_> = batch.iter().map(|t| t.trade_id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["0x1#0", "0x1#1", "0x2#0"]);

        // Replay of the whole batch yields nothing.
        let replay = ingestor.accept_batch(vec![raw("0x2", 0, 1_730_808_060), raw("0x1", 0, 1_730_808_000)]);
        assert!(replay.is_empty());
    }

    #[test]
    fn test_malformed_trade_dropped_not_fatal() {
        let mut ingestor = poll_ingestor(Arc::new(MockTradePoller::new()));
        let mut bad = raw("0xbad", 0, 1_730_808_000);
        bad.price = Some(json!("1.7"));
        let batch = ingestor.accept_batch(vec![bad, raw("0xgood", 0, 1_730_808_000)]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].trade_id.as_str(), "0xgood#0");
    }

    #[test]
    fn test_cursor_never_moves_backward() {
        let mut ingestor = poll_ingestor(Arc::new(MockTradePoller::new()));
        ingestor.accept_batch(vec![raw("0x1", 0, 1_730_808_100)]);
        let high = ingestor.cursor();
        ingestor.accept_batch(vec![raw("0x2", 0, 1_730_808_000)]);
        assert_eq!(ingestor.cursor(), high);
    }

    #[tokio::test]
    async fn test_poll_passes_watermark_to_source() {
        let poller = Arc::new(
            MockTradePoller::new()
                .with_batch(vec![raw("0x1", 0, 1_730_808_000)])
                .with_batch(vec![raw("0x1", 0, 1_730_808_000), raw("0x2", 0, 1_730_808_030)]),
        );
        let mut ingestor = poll_ingestor(Arc::clone(&poller));

        let trades: Vec<Trade> = ingestor.poll().take(2).collect().await;
        assert_eq!(trades[0].trade_id.as_str(), "0x1#0");
        assert_eq!(trades[1].trade_id.as_str(), "0x2#0");

        let cursors = poller.cursors();
        assert_eq!(cursors[0], None);
        assert_eq!(cursors[1], Some(trades[0].occurred_at));
    }

    #[tokio::test]
    async fn test_poll_failure_yields_empty_batch() {
        let poller = Arc::new(MockTradePoller::new());
        poller.push_failure();
        poller.push_batch(vec![raw("0x1", 0, 1_730_808_000)]);
        let mut ingestor = poll_ingestor(poller);

        assert_eq!(ingestor.next_batch().await.map(|b| b.len()), Some(0));
        assert_eq!(ingestor.next_batch().await.map(|b| b.len()), Some(1));
    }

    #[tokio::test]
    async fn test_push_source_drains_and_closes() {
        let (tx, source) = TradeSource::push(16);
        let mut ingestor = TradeIngestor::new(source, 100, CancellationToken::new());

        tx.send(raw("0x1", 0, 1_730_808_000)).await.unwrap();
        tx.send(raw("0x1", 0, 1_730_808_000)).await.unwrap();
        tx.send(raw("0x2", 0, 1_730_808_010)).await.unwrap();
        drop(tx);

        let trades: Vec<Trade> = ingestor.poll().collect().await;
        assert_eq!(trades.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let cancel = CancellationToken::new();
        let (_tx, source) = TradeSource::push(4);
        let mut ingestor = TradeIngestor::new(source, 100, cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let result = tokio::time::timeout(Duration::from_secs(1), ingestor.next_batch()).await;
        assert_eq!(result.ok().flatten().map(|b| b.len()), None);
        canceller.await.unwrap();
    }
}
