//! Background alert delivery.
//!
//! The detection path hands alerts over with [`AlertDispatcher::dispatch`]
//! and never waits for delivery. A background task delivers each alert to
//! every notifier, retrying failures with backoff. Once shutdown is
//! requested, queued alerts get one attempt each and no retries.

use crate::error::{AlertError, AlertResult};
use crate::notifier::Notifier;
use polywatch_core::Alert;
use polywatch_telemetry::Metrics;
use polywatch_upstream::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct AlertDispatcher {
    tx: mpsc::UnboundedSender<Alert>,
    task: JoinHandle<()>,
}

impl AlertDispatcher {
    /// Start the delivery task.
    pub fn spawn(
        notifiers: Vec<Arc<dyn Notifier>>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        info!(
            notifiers = ?notifiers.iter().map(|n| n.name().to_string()).collect::<Vec<_>>(),
            "Alert dispatcher started"
        );
        let task = tokio::spawn(run(rx, notifiers, retry, cancel));
        Self { tx, task }
    }

    /// Queue `alert` for delivery without waiting.
    ///
    /// # Errors
    /// The delivery task has stopped.
    pub fn dispatch(&self, alert: Alert) -> AlertResult<()> {
        self.tx
            .send(alert)
            .map_err(|_| AlertError::DispatcherClosed)
    }

    /// Stop accepting alerts and wait up to `grace` for the queue to drain.
    pub async fn shutdown(self, grace: Duration) {
        let Self { tx, task } = self;
        drop(tx);
        match tokio::time::timeout(grace, task).await {
            Ok(Ok(())) => info!("Alert dispatcher drained"),
            Ok(Err(e)) => error!(error = %e, "Alert dispatcher task failed"),
            Err(_) => warn!(grace_ms = grace.as_millis() as u64, "Alert dispatcher did not drain in time"),
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Alert>,
    notifiers: Vec<Arc<dyn Notifier>>,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    while let Some(alert) = rx.recv().await {
        for notifier in &notifiers {
            deliver_with_retry(notifier.as_ref(), &alert, retry, &cancel).await;
        }
    }
    debug!("Alert queue closed");
}

async fn deliver_with_retry(
    notifier: &dyn Notifier,
    alert: &Alert,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match notifier.deliver(alert).await {
            Ok(()) => {
                Metrics::alert_delivered(notifier.name());
                debug!(
                    notifier = notifier.name(),
                    alert_id = %alert.alert_id,
                    attempt,
                    "Alert delivered"
                );
                return;
            }
            Err(e) if retry.should_retry(attempt) && !cancel.is_cancelled() => {
                let delay = retry.delay_for(attempt);
                warn!(
                    notifier = notifier.name(),
                    alert_id = %alert.alert_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Alert delivery failed, retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                Metrics::alert_delivery_failed(notifier.name());
                error!(
                    notifier = notifier.name(),
                    alert_id = %alert.alert_id,
                    trade_id = %alert.trade.trade_id,
                    attempt,
                    error = %e,
                    "Alert delivery gave up"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::RecordingNotifier;
    use chrono::{TimeZone, Utc};
    use polywatch_core::{
        Confidence, ContextStatus, DetectionVerdict, MarketId, PatternMatch, PatternTag, Price,
        Trade, TradeId, TradeSide, UsdAmount, WalletAddress,
    };
    use rust_decimal_macros::dec;

    fn alert(tx: &str) -> Alert {
        let trade = Trade {
            trade_id: TradeId::new(tx, 0),
            market_id: MarketId::new("0xm"),
            wallet_address: WalletAddress::new("0xw"),
            side: TradeSide::Buy,
            outcome: "Yes".to_string(),
            size_usd: UsdAmount::new(dec!(50000)),
            price: Price::try_new(dec!(0.3)).unwrap(),
            fee_usd: UsdAmount::ZERO,
            occurred_at: Utc.with_ymd_and_hms(2024, 11, 5, 12, 0, 0).unwrap(),
        };
        let verdict = DetectionVerdict::new(
            trade.trade_id.clone(),
            vec![PatternMatch {
                tag: PatternTag::ExpiringMarket,
                confidence: Confidence::new(50),
                explanation: "Market expires soon".to_string(),
            }],
            Confidence::new(50),
        );
        Alert::new(trade, verdict, None, ContextStatus::Fresh, Utc::now())
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_alerts_delivered_to_every_notifier() {
        let a = Arc::new(RecordingNotifier::new());
        let b = Arc::new(RecordingNotifier::new());
        let dispatcher = AlertDispatcher::spawn(
            vec![a.clone() as Arc<dyn Notifier>, b.clone()],
            fast_retry(3),
            CancellationToken::new(),
        );

        dispatcher.dispatch(alert("0x1")).unwrap();
        dispatcher.dispatch(alert("0x2")).unwrap();
        dispatcher.shutdown(Duration::from_secs(1)).await;

        assert_eq!(a.count(), 2);
        assert_eq!(b.count(), 2);
        assert_eq!(a.alerts()[0].trade.trade_id.as_str(), "0x1#0");
    }

    #[tokio::test]
    async fn test_failed_delivery_retried_with_backoff() {
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.fail_next(2);
        let dispatcher =
            AlertDispatcher::spawn(vec![notifier.clone() as Arc<dyn Notifier>], fast_retry(3), CancellationToken::new());

        dispatcher.dispatch(alert("0x1")).unwrap();
        dispatcher.shutdown(Duration::from_secs(1)).await;

        assert_eq!(notifier.attempts(), 3);
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.fail_next(10);
        let dispatcher =
            AlertDispatcher::spawn(vec![notifier.clone() as Arc<dyn Notifier>], fast_retry(2), CancellationToken::new());

        dispatcher.dispatch(alert("0x1")).unwrap();
        dispatcher.dispatch(alert("0x2")).unwrap();
        dispatcher.shutdown(Duration::from_secs(1)).await;

        assert_eq!(notifier.attempts(), 4);
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_no_retries_after_cancel() {
        let cancel = CancellationToken::new();
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.fail_next(1);
        let dispatcher = AlertDispatcher::spawn(
            vec![notifier.clone() as Arc<dyn Notifier>],
            RetryPolicy {
                initial_delay: Duration::from_secs(30),
                ..fast_retry(5)
            },
            cancel.clone(),
        );

        cancel.cancel();
        dispatcher.dispatch(alert("0x1")).unwrap();
        dispatcher.dispatch(alert("0x2")).unwrap();
        tokio::time::timeout(
            Duration::from_secs(2),
            dispatcher.shutdown(Duration::from_secs(1)),
        )
        .await
        .unwrap();

        assert_eq!(notifier.attempts(), 2);
        assert_eq!(notifier.count(), 1);
    }
}
