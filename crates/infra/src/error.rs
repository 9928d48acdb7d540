//! Caller-facing error taxonomy of the ledger engine.
//!
//! Template/posting failures (`LedgerError`), storage failures (`StoreError`)
//! and primitive failures (`DomainError`) are folded into one enum so callers
//! can match on what went wrong without knowing which layer raised it.

use rust_decimal::Decimal;
use thiserror::Error;

use tally_core::{Currency, DomainError, TransactionId};
use tally_ledger::{Layer, LedgerError, ParamDataType};

use crate::store::StoreError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("transaction template '{0}' not found")]
    TemplateNotFound(String),

    /// A journal, account or transaction referenced by the call does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate code: {0}")]
    DuplicateCode(String),

    /// Only surfaced when the winning transaction cannot be read back.
    #[error("duplicate external id: {0}")]
    DuplicateExternalId(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    #[error("parameter '{name}' expects {expected}, got {found}")]
    InvalidParameterType {
        name: String,
        expected: ParamDataType,
        found: ParamDataType,
    },

    #[error("unbound parameter '{0}'")]
    UnboundParameter(String),

    #[error("{slot} expects {expected}, resolved to {found}")]
    TypeMismatch {
        slot: String,
        expected: ParamDataType,
        found: ParamDataType,
    },

    #[error("unbalanced transaction for {currency}/{layer}: debits {debits} != credits {credits}")]
    UnbalancedTransaction {
        currency: Currency,
        layer: Layer,
        debits: Decimal,
        credits: Decimal,
    },

    /// A materialized entry is unusable (negative units, bad currency).
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    /// Malformed caller input (empty name, bad code, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transaction {0} is already voided")]
    AlreadyVoided(TransactionId),

    /// The posting would push a running total out of range. Not retryable.
    #[error("ledger invariant violated: {0}")]
    InvariantViolation(String),

    /// Lost a race that the caller may retry.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error(transparent)]
    Storage(StoreError),
}

impl EngineError {
    /// Whether repeating the same call can succeed without changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict(_))
    }
}

impl From<LedgerError> for EngineError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::InvalidTemplate(msg) => EngineError::InvalidTemplate(msg),
            LedgerError::MissingParameter(name) => EngineError::MissingParameter(name),
            LedgerError::InvalidParameterType { name, expected, found } => {
                EngineError::InvalidParameterType { name, expected, found }
            }
            LedgerError::UnboundParameter(name) => EngineError::UnboundParameter(name),
            LedgerError::TypeMismatch { slot, expected, found } => EngineError::TypeMismatch { slot, expected, found },
            LedgerError::UnbalancedTransaction {
                currency,
                layer,
                debits,
                credits,
            } => EngineError::UnbalancedTransaction {
                currency,
                layer,
                debits,
                credits,
            },
            err @ LedgerError::NegativeUnits { .. } => EngineError::InvalidEntry(err.to_string()),
            LedgerError::InvalidValue(msg) => EngineError::InvalidEntry(msg),
            LedgerError::Domain(err) => err.into(),
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => EngineError::Validation(msg),
            err @ DomainError::UnitsOverflow { .. } => EngineError::InvariantViolation(err.to_string()),
            err => EngineError::Validation(err.to_string()),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => EngineError::NotFound(msg),
            StoreError::DuplicateCode(msg) => EngineError::DuplicateCode(msg),
            StoreError::DuplicateExternalId(msg) => EngineError::DuplicateExternalId(msg),
            StoreError::AlreadyVoided(id) => EngineError::AlreadyVoided(id),
            StoreError::Concurrency(msg) => EngineError::ConcurrencyConflict(msg),
            StoreError::Invariant(msg) => EngineError::InvariantViolation(msg),
            StoreError::Unavailable(msg) => EngineError::StorageUnavailable(msg),
            err @ StoreError::Corrupt(_) => EngineError::Storage(err),
        }
    }
}
