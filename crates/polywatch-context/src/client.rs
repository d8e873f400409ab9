//! HTTP context providers.
//!
//! - [`HttpWalletProvider`]: wallet trade history from the data API, plus
//!   an optional funding-events endpoint
//! - [`HttpMarketProvider`]: market question and expiry from the gamma API

use crate::error::{ContextError, ContextResult};
use crate::provider::{MarketProvider, WalletProvider};
use chrono::{DateTime, TimeZone, Utc};
use polywatch_core::{
    BoxFuture, Clock, FundingEvent, HistoricalTrade, MarketId, MarketInfo, TradeSide, UsdAmount,
    WalletAddress, WalletProfile,
};
use polywatch_upstream::{UpstreamError, UpstreamResult};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Wallet trade record as returned by the data API.
#[derive(Debug, Deserialize)]
struct DataApiTrade {
    #[serde(rename = "conditionId")]
    condition_id: String,
    side: String,
    size: Decimal,
    price: Decimal,
    /// Unix seconds.
    timestamp: i64,
}

/// Funding record from the funding endpoint.
#[derive(Debug, Deserialize)]
struct RawFunding {
    amount_usd: Decimal,
    /// Unix seconds.
    timestamp: i64,
}

/// Market record as returned by the gamma API.
#[derive(Debug, Deserialize)]
struct GammaMarket {
    #[serde(default)]
    question: String,
    #[serde(rename = "endDate", default)]
    end_date: Option<String>,
}

fn build_client(timeout: Duration) -> ContextResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ContextError::HttpClient(format!("Failed to create HTTP client: {e}")))
}

async fn get_json<T: DeserializeOwned>(
    client: &Client,
    target: &str,
    url: &str,
    query: &[(&str, String)],
) -> UpstreamResult<T> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| UpstreamError::from_http(target, &e))?
        .error_for_status()
        .map_err(|e| UpstreamError::from_http(target, &e))?;

    response
        .json::<T>()
        .await
        .map_err(|e| UpstreamError::from_http(target, &e))
}

fn from_unix(target: &str, secs: i64) -> UpstreamResult<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| UpstreamError::Malformed {
            target: target.to_string(),
            message: format!("invalid timestamp {secs}"),
        })
}

/// Summarize a wallet's fetched history.
///
/// A full page may be cut off before the wallet's first trade, so its
/// oldest entry says nothing about age and `first_seen_at` stays unknown.
fn profile_from_history(
    address: WalletAddress,
    trades: Vec<HistoricalTrade>,
    funding: Vec<FundingEvent>,
    page_full: bool,
    now: DateTime<Utc>,
) -> WalletProfile {
    let first_seen_at = if page_full {
        None
    } else {
        trades.first().map(|t| t.occurred_at)
    };
    WalletProfile {
        address,
        first_seen_at,
        trade_count: trades.len() as u64,
        total_volume_usd: trades.iter().map(|t| t.size_usd).sum(),
        recent_funding_events: funding,
        recent_trades: trades,
        cached_at: now,
    }
}

/// Wallet history over HTTP.
pub struct HttpWalletProvider {
    client: Client,
    data_api_url: String,
    funding_url: Option<String>,
    history_limit: u32,
    clock: Arc<dyn Clock>,
}

impl HttpWalletProvider {
    /// # Arguments
    /// * `data_api_url` - base URL of the data API (e.g. `https://data-api.polymarket.com`)
    /// * `funding_url` - optional endpoint returning `[{amount_usd, timestamp}]` for `?address=`
    /// * `history_limit` - trades requested per wallet
    pub fn new(
        data_api_url: impl Into<String>,
        funding_url: Option<String>,
        history_limit: u32,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> ContextResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            data_api_url: data_api_url.into().trim_end_matches('/').to_string(),
            funding_url,
            history_limit,
            clock,
        })
    }

    async fn fetch_trades(&self, address: &WalletAddress) -> UpstreamResult<Vec<HistoricalTrade>> {
        let url = format!("{}/trades", self.data_api_url);
        let raw: Vec<DataApiTrade> = get_json(
            &self.client,
            self.target(),
            &url,
            &[
                ("user", address.to_string()),
                ("limit", self.history_limit.to_string()),
                ("sortBy", "TIMESTAMP".to_string()),
                ("sortDirection", "DESC".to_string()),
            ],
        )
        .await?;

        let mut trades = Vec::with_capacity(raw.len());
        for t in raw {
            let Some(side) = TradeSide::parse(&t.side) else {
                debug!(wallet = %address, side = %t.side, "Skipping history record with unknown side");
                continue;
            };
            trades.push(HistoricalTrade {
                market_id: MarketId::new(&t.condition_id),
                side,
                size_usd: UsdAmount::new((t.size * t.price).abs()),
                occurred_at: from_unix(self.target(), t.timestamp)?,
            });
        }
        trades.sort_by_key(|t| t.occurred_at);
        Ok(trades)
    }

    async fn fetch_funding(&self, address: &WalletAddress) -> UpstreamResult<Vec<FundingEvent>> {
        let Some(url) = self.funding_url.as_deref() else {
            return Ok(Vec::new());
        };
        let raw: Vec<RawFunding> = get_json(
            &self.client,
            self.target(),
            url,
            &[("address", address.to_string())],
        )
        .await?;

        let mut events = raw
            .into_iter()
            .map(|f| {
                Ok(FundingEvent {
                    amount_usd: UsdAmount::new(f.amount_usd.abs()),
                    timestamp: from_unix(self.target(), f.timestamp)?,
                })
            })
            .collect::<UpstreamResult<Vec<_>>>()?;
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

impl WalletProvider for HttpWalletProvider {
    fn target(&self) -> &str {
        "data_api"
    }

    fn fetch_wallet<'a>(
        &'a self,
        address: &'a WalletAddress,
    ) -> BoxFuture<'a, UpstreamResult<WalletProfile>> {
        Box::pin(async move {
            let (trades, funding) =
                tokio::join!(self.fetch_trades(address), self.fetch_funding(address));
            let trades = trades?;
            let funding = funding.unwrap_or_else(|e| {
                warn!(wallet = %address, error = %e, "Funding lookup failed, continuing without");
                Vec::new()
            });

            let page_full = trades.len() >= self.history_limit as usize;
            Ok(profile_from_history(
                address.clone(),
                trades,
                funding,
                page_full,
                self.clock.now(),
            ))
        })
    }
}

/// Market metadata over HTTP.
pub struct HttpMarketProvider {
    client: Client,
    gamma_api_url: String,
    clock: Arc<dyn Clock>,
}

impl HttpMarketProvider {
    pub fn new(
        gamma_api_url: impl Into<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> ContextResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            gamma_api_url: gamma_api_url.into().trim_end_matches('/').to_string(),
            clock,
        })
    }
}

impl MarketProvider for HttpMarketProvider {
    fn target(&self) -> &str {
        "gamma_api"
    }

    fn fetch_market<'a>(
        &'a self,
        market_id: &'a MarketId,
    ) -> BoxFuture<'a, UpstreamResult<MarketInfo>> {
        Box::pin(async move {
            let url = format!("{}/markets", self.gamma_api_url);
            let markets: Vec<GammaMarket> = get_json(
                &self.client,
                self.target(),
                &url,
                &[("condition_ids", market_id.to_string())],
            )
            .await?;

            let market = markets
                .into_iter()
                .next()
                .ok_or_else(|| UpstreamError::NotFound {
                    target: self.target().to_string(),
                    key: market_id.to_string(),
                })?;

            Ok(MarketInfo {
                market_id: market_id.clone(),
                question: market.question,
                expires_at: market.end_date.as_deref().and_then(parse_end_date),
                cached_at: self.clock.now(),
            })
        })
    }
}

/// Accepts RFC 3339 timestamps and bare dates (`2024-11-05`, end of day UTC).
fn parse_end_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
}
