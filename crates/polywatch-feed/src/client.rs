//! HTTP trade poller for the public data API.

use crate::error::{FeedError, FeedResult};
use crate::parser::{parse_trade, RawTrade};
use crate::source::TradePoller;
use chrono::{DateTime, Utc};
use polywatch_core::{BoxFuture, Clock, UsdAmount};
use polywatch_upstream::{GuardConfig, UpstreamError, UpstreamGuard, UpstreamResult};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const TARGET: &str = "trade_feed";

/// Polls `GET {base}/trades` for the most recent market-wide trades.
pub struct HttpTradePoller {
    client: Client,
    url: String,
    limit: u32,
    min_size: Option<UsdAmount>,
    guard: UpstreamGuard,
}

impl HttpTradePoller {
    /// # Arguments
    /// * `base_url` - data API base URL
    /// * `limit` - trades requested per poll
    /// * `min_size` - server-side cash filter, when the API should pre-filter small trades
    pub fn new(
        base_url: &str,
        limit: u32,
        min_size: Option<UsdAmount>,
        guard: GuardConfig,
        clock: Arc<dyn Clock>,
    ) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(guard.call_timeout + Duration::from_secs(1))
            .build()
            .map_err(|e| FeedError::HttpClient(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/trades", base_url.trim_end_matches('/')),
            limit,
            min_size,
            guard: UpstreamGuard::new(TARGET, guard, clock),
        })
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("limit", self.limit.to_string()),
            ("takerOnly", "true".to_string()),
        ];
        if let Some(min) = self.min_size {
            query.push(("filterType", "CASH".to_string()));
            query.push(("filterAmount", min.inner().to_string()));
        }
        query
    }

    async fn fetch_once(&self) -> UpstreamResult<Vec<RawTrade>> {
        let response = self
            .client
            .get(&self.url)
            .query(&self.query())
            .send()
            .await
            .map_err(|e| UpstreamError::from_http(TARGET, &e))?
            .error_for_status()
            .map_err(|e| UpstreamError::from_http(TARGET, &e))?;
        response
            .json::<Vec<RawTrade>>()
            .await
            .map_err(|e| UpstreamError::from_http(TARGET, &e))
    }
}

/// Drop records already behind the cursor. Records that fail to parse are
/// kept so the ingestor can report them.
fn since(raw: Vec<RawTrade>, cursor: Option<DateTime<Utc>>) -> Vec<RawTrade> {
    let Some(cursor) = cursor else {
        return raw;
    };
    raw.into_iter()
        .filter(|r| parse_trade(r).map_or(true, |t| t.occurred_at >= cursor))
        .collect()
}

impl TradePoller for HttpTradePoller {
    fn target(&self) -> &str {
        TARGET
    }

    fn fetch_since<'a>(
        &'a self,
        cursor: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, UpstreamResult<Vec<RawTrade>>> {
        Box::pin(async move {
            let raw = self.guard.call(|| self.fetch_once()).await?;
            let fetched = raw.len();
            let raw = since(raw, cursor);
            debug!(fetched, kept = raw.len(), cursor = ?cursor, "Polled trades");
            Ok(raw)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use polywatch_core::SystemClock;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn raw(ts: i64) -> RawTrade {
        serde_json::from_value(json!({
            "transactionHash": format!("0x{ts}"),
            "conditionId": "0xm",
            "proxyWallet": "0xw",
            "side": "SELL",
            "size": 100,
            "price": 0.5,
            "timestamp": ts
        }))
        .unwrap()
    }

    #[test]
    fn test_since_filters_behind_cursor() {
        let cursor = Utc.timestamp_opt(1_730_808_000, 0).single();
        let mut broken = raw(1_730_700_000);
        broken.side = None;

        let kept = since(
            vec![raw(1_730_807_000), raw(1_730_808_000), raw(1_730_809_000), broken],
            cursor,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(since(vec![raw(1), raw(2)], None).len(), 2);
    }

    #[test]
    fn test_query_includes_cash_filter() {
        let poller = HttpTradePoller::new(
            "https://data-api.example.com/",
            500,
            Some(UsdAmount::new(dec!(10000))),
            GuardConfig::default(),
            Arc::new(SystemClock),
        )
        .unwrap();
        assert_eq!(poller.url, "https://data-api.example.com/trades");
        let query = poller.query();
        assert!(query.contains(&("filterType", "CASH".to_string())));
        assert!(query.contains(&("filterAmount", "10000".to_string())));
    }

    #[test]
    fn test_data_api_record_parses_without_log_index() {
        let trade = parse_trade(&raw(1_730_808_000)).unwrap();
        assert_eq!(trade.trade_id.as_str(), "0x1730808000#0");
        assert_eq!(trade.size_usd, UsdAmount::new(dec!(50.0)));
    }
}
