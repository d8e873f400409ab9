//! Main application orchestration.
//!
//! One loop owns the pipeline:
//! - an ingest task turns the trade source into a stream of new trades
//! - each trade is enriched and evaluated on a bounded worker pool
//! - admitted alerts are handed to the dispatcher without waiting
//! - statistics are logged on a timer
//!
//! Shutdown (Ctrl-C or the cancellation token) stops ingestion, lets
//! in-flight workers finish and gives queued alerts a grace period.

use crate::config::{AppConfig, SourceKind};
use crate::error::AppResult;
use futures_util::StreamExt;
use polywatch_alert::{AlertDeduplicator, AlertDispatcher, LogNotifier, Notifier, WebhookNotifier};
use polywatch_context::{
    HttpMarketProvider, HttpWalletProvider, MarketContext, MarketProvider, WalletContext,
    WalletProvider,
};
use polywatch_core::{Alert, Clock, EnrichedTrade, SystemClock, Trade};
use polywatch_detector::InsiderDetectionEngine;
use polywatch_feed::{HttpTradePoller, RawTrade, TradeIngestor, TradeSource};
use polywatch_telemetry::{Metrics, StatsReporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Externally provided collaborators.
///
/// [`Collaborators::from_config`] builds the production set; tests inject
/// mocks and a manual clock.
pub struct Collaborators {
    pub wallets: Arc<dyn WalletProvider>,
    pub markets: Arc<dyn MarketProvider>,
    pub notifiers: Vec<Arc<dyn Notifier>>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// HTTP providers, log and webhook notifiers, system clock.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let timeout = Duration::from_secs(config.upstream.call_timeout_secs);

        let wallets = HttpWalletProvider::new(
            config.providers.data_api_url.clone(),
            config.providers.funding_url.clone(),
            config.providers.history_limit,
            timeout,
            Arc::clone(&clock),
        )?;
        let markets =
            HttpMarketProvider::new(config.providers.gamma_api_url.clone(), timeout, Arc::clone(&clock))?;

        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if config.alert.log_alerts {
            notifiers.push(Arc::new(LogNotifier));
        }
        if let Some(url) = &config.alert.webhook_url {
            notifiers.push(Arc::new(WebhookNotifier::new(
                url.clone(),
                Duration::from_secs(config.alert.webhook_timeout_secs),
            )?));
        }
        if notifiers.is_empty() {
            warn!("No notifiers configured; alerts will only be counted");
        }

        Ok(Self {
            wallets: Arc::new(wallets),
            markets: Arc::new(markets),
            notifiers,
            clock,
        })
    }
}

/// Counters returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub trades_processed: u64,
    pub alerts_dispatched: u64,
    pub worker_failures: u64,
}

/// Enrich -> evaluate -> dedup for one trade. Shared by every worker.
struct TradePipeline {
    wallets: WalletContext,
    markets: MarketContext,
    engine: InsiderDetectionEngine,
    dedup: AlertDeduplicator,
    clock: Arc<dyn Clock>,
}

impl TradePipeline {
    async fn process(&self, trade: Trade) -> Option<Alert> {
        // Independent lookups; each is bounded by its own upstream guard.
        let (wallet, market) = tokio::join!(
            self.wallets.resolve(&trade.wallet_address),
            self.markets.resolve(&trade.market_id),
        );
        let enriched = EnrichedTrade {
            trade,
            wallet: wallet.value,
            wallet_status: wallet.status,
            market: market.value,
            market_status: market.status,
        };

        let verdict = self.engine.evaluate(&enriched);
        let risk = verdict.risk_level?;
        if !self.dedup.admit(&verdict.trade_id, &verdict.pattern_tags()) {
            return None;
        }
        Metrics::alert_admitted(risk.as_str());
        info!(
            trade_id = %verdict.trade_id,
            wallet = %enriched.trade.wallet_address,
            market = %enriched.trade.market_id,
            %risk,
            confidence = verdict.combined_confidence.value(),
            "Suspicious trade detected"
        );

        let question = enriched
            .market_status
            .is_known()
            .then(|| enriched.market.question.clone());
        Some(Alert::new(
            enriched.trade,
            verdict,
            question,
            enriched.wallet_status,
            self.clock.now(),
        ))
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    pipeline: Arc<TradePipeline>,
    notifiers: Vec<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl Application {
    /// Create the application with production collaborators.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators)
    }

    /// Create the application around injected collaborators.
    pub fn with_collaborators(config: AppConfig, collaborators: Collaborators) -> AppResult<Self> {
        config.validate()?;
        let Collaborators {
            wallets,
            markets,
            notifiers,
            clock,
        } = collaborators;
        let guard = config.upstream.guard_config();

        let pipeline = TradePipeline {
            wallets: WalletContext::new(wallets, config.cache.wallet_cache(), guard, Arc::clone(&clock)),
            markets: MarketContext::new(markets, config.cache.market_cache(), guard, Arc::clone(&clock)),
            engine: InsiderDetectionEngine::new(config.detector.clone())?,
            dedup: AlertDeduplicator::new(config.alert.dedup_config(), Arc::clone(&clock)),
            clock: Arc::clone(&clock),
        };

        info!(
            min_trade_size_usd = %config.detector.min_trade_size_usd,
            source = ?config.feed.source,
            workers = config.runtime.worker_count,
            notifiers = notifiers.len(),
            "Application created"
        );

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            notifiers,
            clock,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Token that stops the run loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Enrich, evaluate and dedup one trade outside the run loop.
    pub async fn process_trade(&self, trade: Trade) -> Option<Alert> {
        self.pipeline.process(trade).await
    }

    /// Run against the configured trade source until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let source = self.build_source()?;

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    cancel.cancel();
                }
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        });

        let summary = self.run_with_source(source).await?;
        info!(
            trades = summary.trades_processed,
            alerts = summary.alerts_dispatched,
            worker_failures = summary.worker_failures,
            "Shutdown complete"
        );
        Ok(())
    }

    fn build_source(&self) -> AppResult<TradeSource> {
        let feed = &self.config.feed;
        match feed.source {
            SourceKind::Poll => {
                let min_size = feed
                    .server_side_filter
                    .then_some(self.config.detector.min_trade_size_usd);
                let poller = HttpTradePoller::new(
                    &self.config.providers.data_api_url,
                    feed.trade_limit,
                    min_size,
                    self.config.upstream.guard_config(),
                    Arc::clone(&self.clock),
                )?;
                Ok(TradeSource::poll(Arc::new(poller), feed.polling_interval()))
            }
            SourceKind::Stdin => {
                let (tx, source) = TradeSource::push(feed.push_buffer);
                tokio::spawn(read_trade_lines(tokio::io::stdin(), tx, self.cancel.clone()));
                Ok(source)
            }
        }
    }

    /// Drive the pipeline until the source ends or the token is cancelled.
    pub async fn run_with_source(self, source: TradeSource) -> AppResult<RunSummary> {
        let Self {
            config,
            pipeline,
            notifiers,
            cancel,
            ..
        } = self;

        let dispatcher = AlertDispatcher::spawn(notifiers, config.alert.retry_policy(), cancel.clone());
        let workers = config.runtime.worker_count;
        let ingestor = TradeIngestor::new(source, config.feed.dedup_capacity, cancel.clone());

        let (trade_tx, mut trade_rx) = mpsc::channel::<Trade>(workers.saturating_mul(4));
        let ingest = tokio::spawn(ingest_trades(ingestor, trade_tx));

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut in_flight: JoinSet<Option<Alert>> = JoinSet::new();
        let reporter = StatsReporter::new();
        let mut stats_interval =
            tokio::time::interval(Duration::from_secs(config.runtime.stats_interval_secs.max(1)));
        stats_interval.tick().await;
        let mut summary = RunSummary::default();

        info!(workers, "Entering main event loop");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Shutdown requested, stopping ingestion");
                    break;
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    summary.record(joined, &dispatcher);
                }

                trade = trade_rx.recv() => {
                    let Some(trade) = trade else {
                        info!("Trade source exhausted");
                        break;
                    };
                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                        break;
                    };
                    let pipeline = Arc::clone(&pipeline);
                    in_flight.spawn(async move {
                        let _permit = permit;
                        Metrics::worker_started();
                        let alert = pipeline.process(trade).await;
                        Metrics::worker_finished();
                        alert
                    });
                }

                _ = stats_interval.tick() => {
                    reporter.log_summary();
                }
            }
        }

        // Trades still queued behind the ingestor are not started.
        drop(trade_rx);
        if let Err(e) = ingest.await {
            error!(error = %e, "Ingest task failed");
        }

        debug!(in_flight = in_flight.len(), "Waiting for in-flight trades");
        while let Some(joined) = in_flight.join_next().await {
            summary.record(joined, &dispatcher);
        }

        dispatcher.shutdown(config.alert.shutdown_grace()).await;
        info!("Final statistics summary:");
        reporter.log_summary();
        Ok(summary)
    }
}

impl RunSummary {
    fn record(&mut self, joined: Result<Option<Alert>, JoinError>, dispatcher: &AlertDispatcher) {
        match joined {
            Ok(alert) => {
                self.trades_processed += 1;
                let Some(alert) = alert else {
                    return;
                };
                let trade_id = alert.trade.trade_id.clone();
                match dispatcher.dispatch(alert) {
                    Ok(()) => self.alerts_dispatched += 1,
                    Err(e) => error!(%trade_id, error = %e, "Failed to queue alert"),
                }
            }
            Err(e) => {
                self.worker_failures += 1;
                error!(error = %e, "Trade worker failed");
            }
        }
    }
}

/// Forward new trades into the loop until the source ends or the loop
/// stops listening.
async fn ingest_trades(mut ingestor: TradeIngestor, tx: mpsc::Sender<Trade>) {
    let trades = ingestor.poll();
    tokio::pin!(trades);
    while let Some(trade) = trades.next().await {
        if tx.send(trade).await.is_err() {
            break;
        }
    }
    debug!("Ingest task stopped");
}

/// Decode newline-delimited JSON trades from `reader` into a push source.
async fn read_trade_lines<R>(reader: R, tx: mpsc::Sender<RawTrade>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawTrade>(line) {
                    Ok(raw) => {
                        if tx.send(raw).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable trade line");
                        Metrics::trade_dropped("invalid_json");
                    }
                }
            }
            Ok(None) => {
                info!("Trade input closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read trade input");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trade_lines_decoded_and_bad_lines_skipped() {
        let input = concat!(
            r#"{"transactionHash":"0x1","conditionId":"0xm","proxyWallet":"0xw","side":"BUY","usdSize":"100","price":"0.5","timestamp":1730808000}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"transaction_hash":"0x2","market_id":"0xm","wallet_address":"0xw","side":"SELL","size_usd":250,"price":0.4,"timestamp":1730808060}"#,
            "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);

        read_trade_lines(input.as_bytes(), tx, CancellationToken::new()).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.transaction_hash.as_deref(), Some("0x1"));
        assert_eq!(second.transaction_hash.as_deref(), Some("0x2"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_trade_lines_stop_on_cancel() {
        let (_writer, reader) = tokio::io::duplex(64);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            read_trade_lines(reader, tx, cancel),
        )
        .await
        .unwrap();
    }
}
