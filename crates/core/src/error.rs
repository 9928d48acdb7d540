//! Errors raised by the ledger primitives.

use rust_decimal::Decimal;
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failure of a primitive constructor or arithmetic step.
///
/// Every variant is deterministic: the same input fails the same way, so none
/// of them is worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Not 2..=10 ASCII alphanumerics.
    #[error("invalid currency code '{0}'")]
    InvalidCurrency(String),

    /// Negative or unparseable units.
    #[error("invalid units: {0}")]
    InvalidUnits(String),

    /// A running total left the representable decimal range.
    #[error("units overflow adding {added} to {total}")]
    UnitsOverflow { total: Decimal, added: Decimal },

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A descriptive field (name, code, enum literal) was rejected.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_units(msg: impl Into<String>) -> Self {
        Self::InvalidUnits(msg.into())
    }
}
