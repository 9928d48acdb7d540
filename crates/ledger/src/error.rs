//! Template and posting failures.
//!
//! Everything here is deterministic: the same template, parameters and ledger
//! state always produce the same error, and no error is raised after a write.

use rust_decimal::Decimal;
use thiserror::Error;

use tally_core::{Currency, DomainError};

use crate::param::ParamDataType;
use crate::primitives::Layer;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// The template definition itself is unusable (bad expression, undeclared
    /// reference, unbalanced literal entries, ...).
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// A declared parameter without default was not supplied.
    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    /// A supplied parameter could not be coerced to its declared type.
    #[error("parameter '{name}' expects {expected}, got {found}")]
    InvalidParameterType {
        name: String,
        expected: ParamDataType,
        found: ParamDataType,
    },

    /// An expression referenced a name absent from the bound parameters.
    #[error("unbound parameter '{0}'")]
    UnboundParameter(String),

    /// An expression resolved to a value not assignable to its slot.
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

    #[error("entry {entry} resolved to negative units {units}")]
    NegativeUnits { entry: usize, units: Decimal },

    /// A resolved value has the right type but an unusable content
    /// (e.g. a currency string that is not a currency code).
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl LedgerError {
    pub fn invalid_template(msg: impl Into<String>) -> Self {
        Self::InvalidTemplate(msg.into())
    }

    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }
}
