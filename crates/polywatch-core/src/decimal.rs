//! Precision-safe decimal types for trade sizes and outcome prices.
//!
//! Uses `rust_decimal` so that size comparisons against thresholds
//! (e.g. "within 10% of the funding amount") are exact.

use crate::error::{CoreError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// A dollar amount (trade size, fee, funding transfer, volume).
///
/// Never negative once constructed through [`UsdAmount::try_new`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UsdAmount(pub Decimal);

impl UsdAmount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Construct, rejecting negative values.
    pub fn try_new(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(CoreError::InvalidAmount(format!("negative amount {value}")));
        }
        Ok(Self(value))
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Absolute difference between two amounts.
    #[inline]
    pub fn abs_diff(&self, other: UsdAmount) -> UsdAmount {
        Self((self.0 - other.0).abs())
    }

    /// `self / other`, or `None` when `other` is zero.
    #[inline]
    pub fn ratio_to(&self, other: UsdAmount) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        Some(self.0 / other.0)
    }
}

impl fmt::Display for UsdAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

impl FromStr for UsdAmount {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_new(s.trim().parse()?)
    }
}

impl From<Decimal> for UsdAmount {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for UsdAmount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for UsdAmount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for UsdAmount {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for UsdAmount {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

impl Sum for UsdAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

/// Outcome share price, a probability in `(0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ONE: Self = Self(Decimal::ONE);

    /// Construct, rejecting values outside `(0, 1]`.
    pub fn try_new(value: Decimal) -> Result<Self> {
        if value <= Decimal::ZERO || value > Decimal::ONE {
            return Err(CoreError::InvalidPrice(format!(
                "{value} is outside (0, 1]"
            )));
        }
        Ok(Self(value))
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    /// Implied probability in percent.
    #[inline]
    pub fn as_percent(&self) -> Decimal {
        self.0 * Decimal::ONE_HUNDRED
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_new(s.trim().parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_usd_rejects_negative() {
        assert!(UsdAmount::try_new(dec!(-1)).is_err());
        assert!(UsdAmount::try_new(dec!(0)).is_ok());
        assert!("12.5".parse::<UsdAmount>().is_ok());
        assert!("abc".parse::<UsdAmount>().is_err());
    }

    #[test]
    fn test_usd_ratio_and_diff() {
        let a = UsdAmount::new(dec!(500));
        let b = UsdAmount::new(dec!(100));
        assert_eq!(a.ratio_to(b), Some(dec!(5)));
        assert_eq!(a.ratio_to(UsdAmount::ZERO), None);
        assert_eq!(b.abs_diff(a), UsdAmount::new(dec!(400)));
    }

    #[test]
    fn test_usd_display() {
        assert_eq!(UsdAmount::new(dec!(482414.91)).to_string(), "$482414.91");
    }

    #[test]
    fn test_price_bounds() {
        assert!(Price::try_new(dec!(0)).is_err());
        assert!(Price::try_new(dec!(1.01)).is_err());
        assert!(Price::try_new(dec!(1)).is_ok());
        let p: Price = "0.35".parse().unwrap();
        assert_eq!(p.as_percent(), dec!(35.00));
    }
}
