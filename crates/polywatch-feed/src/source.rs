//! Trade event sources.
//!
//! A source is either polled on an interval through a [`TradePoller`] or
//! pushes raw events into a channel (e.g. a websocket reader task).

use crate::parser::RawTrade;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use polywatch_core::BoxFuture;
use polywatch_upstream::{UpstreamError, UpstreamResult};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll-based trade feed.
pub trait TradePoller: Send + Sync {
    fn target(&self) -> &str;

    /// Raw trades at or after `cursor` (everything recent when `None`).
    ///
    /// Overlap with earlier batches is expected; the ingestor deduplicates.
    fn fetch_since<'a>(
        &'a self,
        cursor: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, UpstreamResult<Vec<RawTrade>>>;
}

/// Where the ingestor reads raw trades from.
pub enum TradeSource {
    Poll {
        poller: Arc<dyn TradePoller>,
        interval: Duration,
    },
    Push(mpsc::Receiver<RawTrade>),
}

impl TradeSource {
    pub fn poll(poller: Arc<dyn TradePoller>, interval: Duration) -> Self {
        Self::Poll { poller, interval }
    }

    /// Channel-backed source plus the sender a producer task writes into.
    pub fn push(buffer: usize) -> (mpsc::Sender<RawTrade>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::Push(rx))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Poll { .. } => "poll",
            Self::Push(_) => "push",
        }
    }
}

enum Scripted {
    Batch(Vec<RawTrade>),
    Fail,
}

/// Poller replaying scripted batches. Empty once the script runs out.
#[derive(Default)]
pub struct MockTradePoller {
    script: Mutex<VecDeque<Scripted>>,
    cursors: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl MockTradePoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(self, batch: Vec<RawTrade>) -> Self {
        self.push_batch(batch);
        self
    }

    pub fn push_batch(&self, batch: Vec<RawTrade>) {
        self.script.lock().push_back(Scripted::Batch(batch));
    }

    pub fn push_failure(&self) {
        self.script.lock().push_back(Scripted::Fail);
    }

    /// Cursor passed to each `fetch_since` call, in order.
    pub fn cursors(&self) -> Vec<Option<DateTime<Utc>>> {
        self.cursors.lock().clone()
    }
}

impl TradePoller for MockTradePoller {
    fn target(&self) -> &str {
        "mock_feed"
    }

    fn fetch_since<'a>(
        &'a self,
        cursor: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, UpstreamResult<Vec<RawTrade>>> {
        Box::pin(async move {
            self.cursors.lock().push(cursor);
            let next = self.script.lock().pop_front();
            match next {
                Some(Scripted::Batch(batch)) => Ok(batch),
                Some(Scripted::Fail) => Err(UpstreamError::Transient {
                    target: self.target().to_string(),
                    message: "injected failure".to_string(),
                }),
                None => Ok(Vec::new()),
            }
        })
    }
}
