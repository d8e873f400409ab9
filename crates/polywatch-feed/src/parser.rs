//! Raw trade normalization.
//!
//! Event sources disagree on field names and on whether numbers arrive as
//! JSON numbers or strings, so [`RawTrade`] keeps every field loose and
//! [`parse_trade`] does the validation.

use crate::error::{FeedError, FeedResult};
use chrono::{DateTime, TimeZone, Utc};
use polywatch_core::{MarketId, Price, Trade, TradeId, TradeSide, UsdAmount, WalletAddress};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unix timestamps above this are taken as milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Trade event as delivered by an event source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrade {
    #[serde(rename = "transactionHash", alias = "transaction_hash", default)]
    pub transaction_hash: Option<String>,
    #[serde(rename = "logIndex", alias = "log_index", default)]
    pub log_index: Option<u64>,
    #[serde(rename = "conditionId", alias = "market_id", default)]
    pub market_id: Option<String>,
    #[serde(
        rename = "proxyWallet",
        alias = "wallet_address",
        alias = "taker",
        default
    )]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    /// USD notional. Derived from `size * price` when absent.
    #[serde(rename = "usdSize", alias = "size_usd", default)]
    pub size_usd: Option<Value>,
    /// Outcome shares.
    #[serde(default)]
    pub size: Option<Value>,
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(rename = "feeUsd", alias = "fee_usd", default)]
    pub fee_usd: Option<Value>,
    /// Unix seconds, unix milliseconds or RFC 3339.
    #[serde(default)]
    pub timestamp: Option<Value>,
}

fn required_str<'a>(value: &'a Option<String>, field: &'static str) -> FeedResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(FeedError::MissingField(field)),
    }
}

fn decimal(value: &Value, field: &'static str) -> FeedResult<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| FeedError::InvalidField { field, value: text })
}

fn timestamp(value: &Value) -> FeedResult<DateTime<Utc>> {
    let invalid = || FeedError::InvalidField {
        field: "timestamp",
        value: value.to_string(),
    };
    let from_int = |n: i64| {
        let parsed = if n.abs() >= MILLIS_THRESHOLD {
            Utc.timestamp_millis_opt(n).single()
        } else {
            Utc.timestamp_opt(n, 0).single()
        };
        parsed.ok_or_else(invalid)
    };

    match value {
        Value::Number(n) => n.as_i64().map_or_else(|| Err(invalid()), from_int),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                return from_int(n);
            }
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| invalid())
        }
        _ => Err(invalid()),
    }
}

/// Normalize a raw event into a [`Trade`].
///
/// # Errors
/// Missing required field, non-numeric size or price, negative size,
/// price outside `(0, 1]`, unknown side or unparseable timestamp.
pub fn parse_trade(raw: &RawTrade) -> FeedResult<Trade> {
    let tx_hash = required_str(&raw.transaction_hash, "transaction_hash")?;
    let market_id = required_str(&raw.market_id, "market_id")?;
    let wallet = required_str(&raw.wallet_address, "wallet_address")?;
    let side_raw = required_str(&raw.side, "side")?;
    let side = TradeSide::parse(side_raw).ok_or_else(|| FeedError::InvalidField {
        field: "side",
        value: side_raw.to_string(),
    })?;

    let price_raw = decimal(
        raw.price.as_ref().ok_or(FeedError::MissingField("price"))?,
        "price",
    )?;
    let price =
        Price::try_new(price_raw).map_err(|_| FeedError::PriceOutOfRange(price_raw.to_string()))?;

    let size_usd = match (&raw.size_usd, &raw.size) {
        (Some(usd), _) => decimal(usd, "size_usd")?,
        (None, Some(shares)) => decimal(shares, "size")? * price.inner(),
        (None, None) => return Err(FeedError::MissingField("size_usd")),
    };
    let size_usd = UsdAmount::try_new(size_usd).map_err(|_| FeedError::InvalidField {
        field: "size_usd",
        value: size_usd.to_string(),
    })?;

    let fee_usd = match &raw.fee_usd {
        Some(fee) => UsdAmount::new(decimal(fee, "fee_usd")?.abs()),
        None => UsdAmount::ZERO,
    };

    let occurred_at = timestamp(
        raw.timestamp
            .as_ref()
            .ok_or(FeedError::MissingField("timestamp"))?,
    )?;

    Ok(Trade {
        trade_id: TradeId::new(tx_hash, raw.log_index.unwrap_or(0)),
        market_id: MarketId::new(market_id),
        wallet_address: WalletAddress::new(wallet),
        side,
        outcome: raw
            .outcome
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        size_usd,
        price,
        fee_usd,
        occurred_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn raw() -> RawTrade {
        serde_json::from_value(json!({
            "transactionHash": "0xABC",
            "logIndex": 3,
            "conditionId": "0xmarket",
            "proxyWallet": "0xWALLET",
            "side": "buy",
            "outcome": "Yes",
            "usdSize": "482414.91",
            "price": 0.62,
            "timestamp": 1730808000
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_valid_trade() {
        let trade = parse_trade(&raw()).unwrap();
        assert_eq!(trade.trade_id.as_str(), "0xabc#3");
        assert_eq!(trade.wallet_address.as_str(), "0xwallet");
        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.size_usd, UsdAmount::new(dec!(482414.91)));
        assert_eq!(trade.price.inner(), dec!(0.62));
        assert_eq!(trade.fee_usd, UsdAmount::ZERO);
        assert_eq!(
            trade.occurred_at,
            Utc.with_ymd_and_hms(2024, 11, 5, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_size_derived_from_shares() {
        let mut r = raw();
        r.size_usd = None;
        r.size = Some(json!("1000"));
        r.price = Some(json!("0.25"));
        assert_eq!(
            parse_trade(&r).unwrap().size_usd,
            UsdAmount::new(dec!(250))
        );
    }

    #[test]
    fn test_millisecond_and_rfc3339_timestamps() {
        let mut r = raw();
        r.timestamp = Some(json!(1730808000000i64));
        let ms = parse_trade(&r).unwrap().occurred_at;
        r.timestamp = Some(json!("2024-11-05T12:00:00Z"));
        let iso = parse_trade(&r).unwrap().occurred_at;
        assert_eq!(ms, iso);
    }

    #[test]
    fn test_missing_field_rejected() {
        let mut r = raw();
        r.transaction_hash = None;
        assert_eq!(
            parse_trade(&r),
            Err(FeedError::MissingField("transaction_hash"))
        );

        let mut r = raw();
        r.wallet_address = Some("  ".into());
        assert_eq!(
            parse_trade(&r),
            Err(FeedError::MissingField("wallet_address"))
        );
    }

    #[test]
    fn test_non_numeric_size_rejected() {
        let mut r = raw();
        r.size_usd = Some(json!("lots"));
        assert!(matches!(
            parse_trade(&r),
            Err(FeedError::InvalidField {
                field: "size_usd",
                ..
            })
        ));
    }

    #[test]
    fn test_price_bounds_enforced() {
        for bad in [json!(0), json!(1.5), json!("-0.2")] {
            let mut r = raw();
            r.price = Some(bad);
            assert!(matches!(
                parse_trade(&r),
                Err(FeedError::PriceOutOfRange(_))
            ));
        }
        let mut r = raw();
        r.price = Some(json!(1));
        assert!(parse_trade(&r).is_ok());
    }

    #[test]
    fn test_negative_size_and_bad_side_rejected() {
        let mut r = raw();
        r.size_usd = Some(json!(-5));
        assert!(parse_trade(&r).is_err());

        let mut r = raw();
        r.side = Some("HOLD".into());
        assert!(matches!(
            parse_trade(&r),
            Err(FeedError::InvalidField { field: "side", .. })
        ));
    }
}
