//! Typed template parameters and their binding.
//!
//! A template declares `ParamDefinition`s; a caller supplies `Params`. Binding
//! turns the supplied values into a complete, correctly typed set the expression
//! evaluator can resolve against.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tally_core::{AccountId, JournalId, TransactionId};

use crate::error::{LedgerError, LedgerResult};
use crate::expr::Expr;

/// Runtime type of a parameter or expression slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamDataType {
    String,
    Integer,
    Decimal,
    Boolean,
    Uuid,
    Date,
    Timestamp,
    Json,
}

impl ParamDataType {
    /// Whether a value of type `self` can fill a slot of type `slot`.
    ///
    /// Integers widen to decimals; everything else must match exactly.
    pub fn is_assignable_to(self, slot: ParamDataType) -> bool {
        self == slot || (self == ParamDataType::Integer && slot == ParamDataType::Decimal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamDataType::String => "STRING",
            ParamDataType::Integer => "INTEGER",
            ParamDataType::Decimal => "DECIMAL",
            ParamDataType::Boolean => "BOOLEAN",
            ParamDataType::Uuid => "UUID",
            ParamDataType::Date => "DATE",
            ParamDataType::Timestamp => "TIMESTAMP",
            ParamDataType::Json => "JSON",
        }
    }
}

impl fmt::Display for ParamDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "UPPERCASE")]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
}

impl ParamValue {
    pub fn data_type(&self) -> ParamDataType {
        match self {
            ParamValue::String(_) => ParamDataType::String,
            ParamValue::Integer(_) => ParamDataType::Integer,
            ParamValue::Decimal(_) => ParamDataType::Decimal,
            ParamValue::Boolean(_) => ParamDataType::Boolean,
            ParamValue::Uuid(_) => ParamDataType::Uuid,
            ParamValue::Date(_) => ParamDataType::Date,
            ParamValue::Timestamp(_) => ParamDataType::Timestamp,
            ParamValue::Json(_) => ParamDataType::Json,
        }
    }

    /// Convert a caller-supplied value to a declared parameter type.
    ///
    /// Exact matches pass through, integers widen to decimals and strings are
    /// parsed into the scalar types. Returns `None` when no conversion applies.
    pub fn coerce_to(&self, ty: ParamDataType) -> Option<ParamValue> {
        if self.data_type() == ty {
            return Some(self.clone());
        }
        match (self, ty) {
            (ParamValue::Integer(i), ParamDataType::Decimal) => Some(ParamValue::Decimal(Decimal::from(*i))),
            (ParamValue::String(s), ParamDataType::Uuid) => Uuid::from_str(s.trim()).ok().map(ParamValue::Uuid),
            (ParamValue::String(s), ParamDataType::Decimal) => {
                Decimal::from_str_exact(s.trim()).ok().map(ParamValue::Decimal)
            }
            (ParamValue::String(s), ParamDataType::Integer) => s.trim().parse().ok().map(ParamValue::Integer),
            (ParamValue::String(s), ParamDataType::Date) => {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok().map(ParamValue::Date)
            }
            (ParamValue::String(s), ParamDataType::Timestamp) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|t| ParamValue::Timestamp(t.with_timezone(&Utc))),
            _ => None,
        }
    }
}

macro_rules! impl_from_for_param_value {
    ($($t:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$t> for ParamValue {
                fn from(value: $t) -> Self {
                    ParamValue::$variant(value.into())
                }
            }
        )+
    };
}

impl_from_for_param_value!(
    String => String,
    &str => String,
    i64 => Integer,
    i32 => Integer,
    Decimal => Decimal,
    bool => Boolean,
    Uuid => Uuid,
    AccountId => Uuid,
    JournalId => Uuid,
    TransactionId => Uuid,
    NaiveDate => Date,
    DateTime<Utc> => Timestamp,
    JsonValue => Json,
);

/// Named parameter values, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, ParamValue)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A declared template parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDefinition {
    pub name: String,
    pub data_type: ParamDataType,
    /// Literal-only default, already checked against `data_type`.
    pub default: Option<Expr>,
    pub description: Option<String>,
}

/// Input form of a parameter definition; the default is raw expression text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewParamDefinition {
    pub name: String,
    pub data_type: ParamDataType,
    pub default: Option<String>,
    pub description: Option<String>,
}

impl NewParamDefinition {
    pub fn new(name: impl Into<String>, data_type: ParamDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl TryFrom<NewParamDefinition> for ParamDefinition {
    type Error = LedgerError;

    fn try_from(new: NewParamDefinition) -> Result<Self, Self::Error> {
        if !is_identifier(&new.name) {
            return Err(LedgerError::invalid_template(format!(
                "invalid parameter name '{}'",
                new.name
            )));
        }

        let default = match new.default {
            None => None,
            Some(src) => {
                let expr: Expr = src.parse()?;
                let Some(literal) = expr.literal() else {
                    return Err(LedgerError::invalid_template(format!(
                        "default for '{}' must be a literal, got '{expr}'",
                        new.name
                    )));
                };
                if !literal.data_type().is_assignable_to(new.data_type) {
                    return Err(LedgerError::invalid_template(format!(
                        "default for '{}' is {}, declared {}",
                        new.name,
                        literal.data_type(),
                        new.data_type
                    )));
                }
                Some(expr)
            }
        };

        Ok(ParamDefinition {
            name: new.name,
            data_type: new.data_type,
            default,
            description: new.description,
        })
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Bind supplied values against declared parameters.
///
/// Undeclared names in `supplied` are skipped and returned so the caller can
/// report them; they never cause a failure.
pub fn bind(definitions: &[ParamDefinition], supplied: &Params) -> LedgerResult<(Params, Vec<String>)> {
    let mut bound = Params::new();

    for def in definitions {
        let value = match supplied.get(&def.name) {
            Some(value) => value.coerce_to(def.data_type).ok_or_else(|| LedgerError::InvalidParameterType {
                name: def.name.clone(),
                expected: def.data_type,
                found: value.data_type(),
            })?,
            None => match def.default.as_ref().and_then(Expr::literal) {
                Some(default) => default.coerce_to(def.data_type).ok_or_else(|| LedgerError::InvalidParameterType {
                    name: def.name.clone(),
                    expected: def.data_type,
                    found: default.data_type(),
                })?,
                None => return Err(LedgerError::MissingParameter(def.name.clone())),
            },
        };
        bound.insert(def.name.clone(), value);
    }

    let ignored = supplied
        .iter()
        .filter(|(name, _)| !definitions.iter().any(|d| &d.name == *name))
        .map(|(name, _)| name.clone())
        .collect();

    Ok((bound, ignored))
}
