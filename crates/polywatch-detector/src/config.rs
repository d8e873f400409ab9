//! Detector configuration.

use crate::error::{DetectorError, DetectorResult};
use chrono::Duration;
use polywatch_core::UsdAmount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Thresholds shared by every rule.
///
/// `min_trade_size_usd` has no default: deployments disagree on it by an
/// order of magnitude, so it must be configured explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Trades at or above this size count as "large".
    pub min_trade_size_usd: UsdAmount,
    /// How far back a funding event may precede the trade.
    #[serde(default = "default_funding_lookback_hours")]
    pub funding_lookback_hours: u32,
    /// Window for counting a wallet's earlier large trades.
    #[serde(default = "default_trade_history_check_days")]
    pub trade_history_check_days: u32,
    /// Volume floor for concentrated trading. Defaults to 1.5x the minimum size.
    #[serde(default)]
    pub concentration_floor_usd: Option<UsdAmount>,
}

fn default_funding_lookback_hours() -> u32 {
    24
}

fn default_trade_history_check_days() -> u32 {
    30
}

impl DetectorConfig {
    pub fn new(min_trade_size_usd: UsdAmount) -> Self {
        Self {
            min_trade_size_usd,
            funding_lookback_hours: default_funding_lookback_hours(),
            trade_history_check_days: default_trade_history_check_days(),
            concentration_floor_usd: None,
        }
    }

    /// Validate configuration values.
    ///
    /// Returns Err if:
    /// - min_trade_size_usd <= 0
    /// - funding_lookback_hours == 0
    /// - trade_history_check_days == 0
    /// - concentration_floor_usd is set and negative
    pub fn validate(&self) -> DetectorResult<()> {
        if self.min_trade_size_usd.inner() <= Decimal::ZERO {
            return Err(DetectorError::ConfigError(format!(
                "min_trade_size_usd ({}) must be positive",
                self.min_trade_size_usd
            )));
        }
        if self.funding_lookback_hours == 0 {
            return Err(DetectorError::ConfigError(
                "funding_lookback_hours must be at least 1".to_string(),
            ));
        }
        if self.trade_history_check_days == 0 {
            return Err(DetectorError::ConfigError(
                "trade_history_check_days must be at least 1".to_string(),
            ));
        }
        if let Some(floor) = self.concentration_floor_usd {
            if floor.inner().is_sign_negative() {
                return Err(DetectorError::ConfigError(format!(
                    "concentration_floor_usd ({floor}) must be non-negative"
                )));
            }
        }
        Ok(())
    }

    pub fn funding_lookback(&self) -> Duration {
        Duration::hours(i64::from(self.funding_lookback_hours))
    }

    pub fn trade_history_window(&self) -> Duration {
        Duration::days(i64::from(self.trade_history_check_days))
    }

    pub fn concentration_floor(&self) -> UsdAmount {
        self.concentration_floor_usd
            .unwrap_or(self.min_trade_size_usd * Decimal::new(15, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::new(UsdAmount::new(dec!(10000)));
        assert_eq!(config.funding_lookback(), Duration::hours(24));
        assert_eq!(config.trade_history_window(), Duration::days(30));
        assert_eq!(config.concentration_floor(), UsdAmount::new(dec!(15000)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_min_size_is_required() {
        let missing = serde_json::from_str::<DetectorConfig>(r#"{"funding_lookback_hours": 12}"#);
        assert!(missing.is_err());

        let parsed: DetectorConfig =
            serde_json::from_str(r#"{"min_trade_size_usd": "100000"}"#).unwrap();
        assert_eq!(parsed.min_trade_size_usd, UsdAmount::new(dec!(100000)));
        assert_eq!(parsed.funding_lookback_hours, 24);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = DetectorConfig::new(UsdAmount::ZERO);
        assert!(zero.validate().is_err());

        let no_lookback = DetectorConfig {
            funding_lookback_hours: 0,
            ..DetectorConfig::new(UsdAmount::new(dec!(10000)))
        };
        assert!(no_lookback.validate().is_err());

        let negative_floor = DetectorConfig {
            concentration_floor_usd: Some(UsdAmount::new(dec!(-1))),
            ..DetectorConfig::new(UsdAmount::new(dec!(10000)))
        };
        assert!(negative_floor.validate().is_err());
    }
}
