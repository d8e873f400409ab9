//! Notifier collaborators.
//!
//! A notifier's only contract is "deliver this alert snapshot". Formatting
//! belongs to the notifier; retries belong to the dispatcher.

use crate::error::{AlertError, AlertResult};
use parking_lot::Mutex;
use polywatch_core::{Alert, BoxFuture};
use reqwest::Client;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::info;

pub trait Notifier: Send + Sync {
    /// Label used in logs and metrics.
    fn name(&self) -> &str;

    fn deliver<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, AlertResult<()>>;
}

/// Writes each alert as one structured log line.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, AlertResult<()>> {
        Box::pin(async move {
            let patterns: Vec<&str> = alert
                .verdict
                .matched_patterns
                .iter()
                .map(|m| m.tag.as_str())
                .collect();
            info!(
                alert_id = %alert.alert_id,
                trade_id = %alert.trade.trade_id,
                market = %alert.trade.market_id,
                question = alert.market_question.as_deref().unwrap_or("unknown"),
                wallet = %alert.trade.wallet_address,
                risk = %alert.risk_level(),
                confidence = alert.verdict.combined_confidence.value(),
                patterns = ?patterns,
                reasons = ?alert.verdict.explanations,
                "{}",
                alert.headline()
            );
            Ok(())
        })
    }
}

/// POSTs the alert as JSON to a webhook endpoint.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AlertResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertError::HttpClient(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn failure(&self, message: impl Into<String>) -> AlertError {
        AlertError::Delivery {
            notifier: self.name().to_string(),
            message: message.into(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, AlertResult<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .json(alert)
                .send()
                .await
                .map_err(|e| self.failure(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(self.failure(format!("HTTP {status}")));
            }
            Ok(())
        })
    }
}

/// Keeps delivered alerts in memory. Failures can be injected.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Alert>>,
    attempts: AtomicU32,
    failures: AtomicU32,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` deliveries.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.delivered.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Deliveries attempted, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn deliver<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, AlertResult<()>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let injected = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(AlertError::Delivery {
                    notifier: self.name().to_string(),
                    message: "injected failure".to_string(),
                });
            }
            self.delivered.lock().push(alert.clone());
            Ok(())
        })
    }
}
