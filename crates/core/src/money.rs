//! Money primitives: currency codes and non-negative decimal units.
//!
//! Entries never store signed amounts. A `Units` value is a magnitude; the sign
//! of its effect on a balance comes from the entry direction and the account's
//! normal-balance side.

use core::fmt;
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A currency code (`USD`, `EUR`, `BTC`, `USDT`, ...).
///
/// # Invariant
/// 2..=10 ASCII alphanumerics, stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub const MIN_LEN: usize = 2;
    pub const MAX_LEN: usize = 10;

    pub fn new(code: impl AsRef<str>) -> DomainResult<Self> {
        let code = code.as_ref().trim();
        let valid_len = (Self::MIN_LEN..=Self::MAX_LEN).contains(&code.len());
        if !valid_len || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Currency {}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// A non-negative decimal magnitude.
///
/// # Invariant
/// The inner value is always `>= 0`. Scale is preserved as supplied; equality is
/// by numeric value, so `10.00 == 10.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Units(Decimal);

impl Units {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::invalid_units(format!("cannot be negative: {value}")));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(&self, other: Units) -> DomainResult<Units> {
        self.0
            .checked_add(other.0)
            .map(Units)
            .ok_or(DomainError::UnitsOverflow {
                total: self.0,
                added: other.0,
            })
    }
}

impl ValueObject for Units {}

impl Default for Units {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<Decimal> for Units {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Units> for Decimal {
    fn from(value: Units) -> Self {
        value.0
    }
}

impl FromStr for Units {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str_exact(s.trim())
            .map_err(|e| DomainError::invalid_units(format!("'{s}': {e}")))?;
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn currency_is_normalized_to_upper_case() {
        let c = Currency::new("usd").unwrap();
        assert_eq!(c.code(), "USD");
        assert_eq!(c, "USD".parse().unwrap());
    }

    #[test]
    fn currency_rejects_garbage() {
        assert!(Currency::new("").is_err());
        assert!(Currency::new("U").is_err());
        assert_eq!(Currency::new("US-D"), Err(DomainError::InvalidCurrency("US-D".into())));
        assert!(Currency::new("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn units_reject_negative_values() {
        assert!(matches!(Units::new(dec!(-0.01)), Err(DomainError::InvalidUnits(_))));
        assert!(Units::new(dec!(0)).is_ok());
        assert!("-1".parse::<Units>().is_err());
    }

    #[test]
    fn units_compare_by_value_not_scale() {
        let a: Units = "10.00".parse().unwrap();
        let b: Units = "10.0".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn units_add() {
        let a = Units::new(dec!(9.53)).unwrap();
        let b = Units::new(dec!(0.47)).unwrap();
        assert_eq!(a.checked_add(b).unwrap().value(), dec!(10.00));
    }

    #[test]
    fn overflow_reports_both_operands() {
        let max = Units::new(Decimal::MAX).unwrap();
        let one = Units::new(dec!(1)).unwrap();
        let err = max.checked_add(one).unwrap_err();
        assert_eq!(
            err,
            DomainError::UnitsOverflow {
                total: Decimal::MAX,
                added: dec!(1),
            }
        );
    }

    #[test]
    fn currency_serializes_as_plain_string() {
        let c = Currency::new("eur").unwrap();
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"EUR\"");
        let back: Currency = serde_json::from_str("\"eur\"").unwrap();
        assert_eq!(back, c);
    }
}
