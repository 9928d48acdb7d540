//! Transaction templates.
//!
//! A template is an immutable blueprint: declared parameters, a header
//! expression group and an ordered list of entry templates. Everything that can
//! be checked without parameter values is checked at creation, so a template
//! that exists is one that can post.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tally_core::{Currency, Entity, TxTemplateId};

use crate::error::{LedgerError, LedgerResult};
use crate::expr::Expr;
use crate::param::{NewParamDefinition, ParamDataType, ParamDefinition, ParamValue};
use crate::posting::check_balanced;
use crate::primitives::{Direction, Layer};

/// Header expressions of the transaction a template produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInputTemplate {
    pub journal_id: Expr,
    pub effective: Expr,
    pub correlation_id: Option<Expr>,
    pub external_id: Option<Expr>,
    pub description: Option<Expr>,
    pub metadata: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryTemplate {
    pub entry_type: String,
    pub account_id: Expr,
    pub currency: Expr,
    pub direction: Direction,
    pub layer: Layer,
    pub units: Expr,
    pub description: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxTemplate {
    pub id: TxTemplateId,
    pub code: String,
    pub description: Option<String>,
    pub params: Vec<ParamDefinition>,
    pub transaction: TxInputTemplate,
    pub entries: Vec<EntryTemplate>,
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl Entity for TxTemplate {
    type Id = TxTemplateId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Header input: raw expression source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTxInput {
    pub journal_id: String,
    pub effective: String,
    pub correlation_id: Option<String>,
    pub external_id: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<String>,
}

impl NewTxInput {
    pub fn new(journal_id: impl Into<String>, effective: impl Into<String>) -> Self {
        Self {
            journal_id: journal_id.into(),
            effective: effective.into(),
            correlation_id: None,
            external_id: None,
            description: None,
            metadata: None,
        }
    }

    pub fn with_correlation_id(mut self, expr: impl Into<String>) -> Self {
        self.correlation_id = Some(expr.into());
        self
    }

    pub fn with_external_id(mut self, expr: impl Into<String>) -> Self {
        self.external_id = Some(expr.into());
        self
    }

    pub fn with_description(mut self, expr: impl Into<String>) -> Self {
        self.description = Some(expr.into());
        self
    }

    pub fn with_metadata(mut self, expr: impl Into<String>) -> Self {
        self.metadata = Some(expr.into());
        self
    }
}

/// Entry input: raw expression source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntryTemplate {
    pub entry_type: String,
    pub account_id: String,
    pub currency: String,
    pub direction: Direction,
    pub layer: Layer,
    pub units: String,
    pub description: Option<String>,
}

impl NewEntryTemplate {
    pub fn new(
        entry_type: impl Into<String>,
        account_id: impl Into<String>,
        currency: impl Into<String>,
        direction: Direction,
        layer: Layer,
        units: impl Into<String>,
    ) -> Self {
        Self {
            entry_type: entry_type.into(),
            account_id: account_id.into(),
            currency: currency.into(),
            direction,
            layer,
            units: units.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, expr: impl Into<String>) -> Self {
        self.description = Some(expr.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTxTemplate {
    pub id: TxTemplateId,
    pub code: String,
    pub description: Option<String>,
    pub params: Vec<NewParamDefinition>,
    pub transaction: NewTxInput,
    pub entries: Vec<NewEntryTemplate>,
    pub metadata: Option<JsonValue>,
}

impl NewTxTemplate {
    pub fn new(code: impl Into<String>, transaction: NewTxInput) -> Self {
        Self {
            id: TxTemplateId::new(),
            code: code.into(),
            description: None,
            params: Vec::new(),
            transaction,
            entries: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_param(mut self, param: NewParamDefinition) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_entry(mut self, entry: NewEntryTemplate) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub(crate) mod slot {
    use crate::param::ParamDataType;

    pub const JOURNAL_ID: (&str, ParamDataType) = ("transaction.journal_id", ParamDataType::Uuid);
    pub const EFFECTIVE: (&str, ParamDataType) = ("transaction.effective", ParamDataType::Date);
    pub const CORRELATION_ID: (&str, ParamDataType) = ("transaction.correlation_id", ParamDataType::String);
    pub const EXTERNAL_ID: (&str, ParamDataType) = ("transaction.external_id", ParamDataType::String);
    pub const DESCRIPTION: (&str, ParamDataType) = ("transaction.description", ParamDataType::String);
    pub const METADATA: (&str, ParamDataType) = ("transaction.metadata", ParamDataType::Json);

    pub const ACCOUNT_ID: ParamDataType = ParamDataType::Uuid;
    pub const CURRENCY: ParamDataType = ParamDataType::String;
    pub const UNITS: ParamDataType = ParamDataType::Decimal;
    pub const ENTRY_DESCRIPTION: ParamDataType = ParamDataType::String;

    pub fn entry(index: usize, field: &str) -> String {
        format!("entries[{index}].{field}")
    }
}

fn parse_opt(src: Option<String>) -> LedgerResult<Option<Expr>> {
    src.map(|s| s.parse()).transpose()
}

impl TxTemplate {
    /// Build and statically validate a template.
    pub fn create(new: NewTxTemplate, now: DateTime<Utc>) -> LedgerResult<Self> {
        let code = new.code.trim().to_string();
        if code.is_empty() {
            return Err(LedgerError::invalid_template("template code cannot be empty"));
        }

        let mut params = Vec::with_capacity(new.params.len());
        let mut seen = HashSet::new();
        for p in new.params {
            if !seen.insert(p.name.clone()) {
                return Err(LedgerError::invalid_template(format!("duplicate parameter '{}'", p.name)));
            }
            params.push(ParamDefinition::try_from(p)?);
        }

        let tx = new.transaction;
        let transaction = TxInputTemplate {
            journal_id: tx.journal_id.parse()?,
            effective: tx.effective.parse()?,
            correlation_id: parse_opt(tx.correlation_id)?,
            external_id: parse_opt(tx.external_id)?,
            description: parse_opt(tx.description)?,
            metadata: parse_opt(tx.metadata)?,
        };

        if new.entries.is_empty() {
            return Err(LedgerError::invalid_template("template must declare at least one entry"));
        }
        let mut entries = Vec::with_capacity(new.entries.len());
        for e in new.entries {
            let entry_type = e.entry_type.trim().to_string();
            if entry_type.is_empty() {
                return Err(LedgerError::invalid_template("entry_type cannot be empty"));
            }
            entries.push(EntryTemplate {
                entry_type,
                account_id: e.account_id.parse()?,
                currency: e.currency.parse()?,
                direction: e.direction,
                layer: e.layer,
                units: e.units.parse()?,
                description: parse_opt(e.description)?,
            });
        }

        let template = Self {
            id: new.id,
            code,
            description: new.description,
            params,
            transaction,
            entries,
            metadata: new.metadata,
            created_at: now,
        };
        template.validate()?;
        Ok(template)
    }

    pub fn param(&self, name: &str) -> Option<&ParamDefinition> {
        self.params.iter().find(|p| p.name == name)
    }

    fn validate(&self) -> LedgerResult<()> {
        let tx = &self.transaction;
        let header: [(&Option<Expr>, (&str, ParamDataType)); 4] = [
            (&tx.correlation_id, slot::CORRELATION_ID),
            (&tx.external_id, slot::EXTERNAL_ID),
            (&tx.description, slot::DESCRIPTION),
            (&tx.metadata, slot::METADATA),
        ];
        self.check_slot(&tx.journal_id, slot::JOURNAL_ID.0, slot::JOURNAL_ID.1)?;
        self.check_slot(&tx.effective, slot::EFFECTIVE.0, slot::EFFECTIVE.1)?;
        for (expr, (name, ty)) in header {
            if let Some(expr) = expr {
                self.check_slot(expr, name, ty)?;
            }
        }

        for (i, e) in self.entries.iter().enumerate() {
            self.check_slot(&e.account_id, &slot::entry(i, "account_id"), slot::ACCOUNT_ID)?;
            self.check_slot(&e.currency, &slot::entry(i, "currency"), slot::CURRENCY)?;
            self.check_slot(&e.units, &slot::entry(i, "units"), slot::UNITS)?;
            if let Some(d) = &e.description {
                self.check_slot(d, &slot::entry(i, "description"), slot::ENTRY_DESCRIPTION)?;
            }
        }

        self.check_literal_entries()
    }

    fn check_slot(&self, expr: &Expr, slot: &str, expected: ParamDataType) -> LedgerResult<()> {
        let found = match expr {
            Expr::Literal(v) => v.data_type(),
            Expr::ParamRef(name) => match self.param(name) {
                Some(def) => def.data_type,
                None => {
                    return Err(LedgerError::invalid_template(format!(
                        "{slot} references undeclared parameter '{name}'"
                    )));
                }
            },
        };
        if !found.is_assignable_to(expected) {
            return Err(LedgerError::invalid_template(format!(
                "{slot} expects {expected}, expression '{expr}' is {found}"
            )));
        }
        Ok(())
    }

    /// Reject literal currencies/units that can never post, and templates
    /// whose entries are fully literal and cannot balance.
    fn check_literal_entries(&self) -> LedgerResult<()> {
        let mut legs = Vec::with_capacity(self.entries.len());
        let mut all_literal = true;
        for (i, e) in self.entries.iter().enumerate() {
            let currency = match e.currency.literal() {
                Some(ParamValue::String(s)) => Some(Currency::new(s).map_err(|err| {
                    LedgerError::invalid_template(format!("{}: {err}", slot::entry(i, "currency")))
                })?),
                _ => None,
            };
            let units = match e.units.literal() {
                Some(ParamValue::Decimal(d)) => Some(*d),
                Some(ParamValue::Integer(n)) => Some(Decimal::from(*n)),
                _ => None,
            };
            if let Some(u) = units {
                if u.is_sign_negative() && !u.is_zero() {
                    return Err(LedgerError::invalid_template(format!(
                        "{} is negative",
                        slot::entry(i, "units")
                    )));
                }
            }
            match (currency, units) {
                (Some(c), Some(u)) => legs.push((c, e.layer, e.direction, u)),
                _ => all_literal = false,
            }
        }

        if !all_literal {
            return Ok(());
        }
        check_balanced(legs.iter().map(|(c, l, d, u)| (c, *l, *d, *u)))
            .map_err(|e| LedgerError::invalid_template(format!("entries can never balance: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{AccountId, JournalId};

    fn uuid_lit<T: std::fmt::Display>(id: T) -> String {
        format!("uuid('{id}')")
    }

    fn base() -> NewTxTemplate {
        NewTxTemplate::new(
            "TRANSFER",
            NewTxInput::new(uuid_lit(JournalId::new()), "params.effective"),
        )
        .with_param(NewParamDefinition::new("effective", ParamDataType::Date))
        .with_param(NewParamDefinition::new("amount", ParamDataType::Decimal))
    }

    fn leg(direction: Direction, units: &str) -> NewEntryTemplate {
        NewEntryTemplate::new("XFER", uuid_lit(AccountId::new()), "'USD'", direction, Layer::Settled, units)
    }

    fn invalid(new: NewTxTemplate) -> String {
        match TxTemplate::create(new, Utc::now()) {
            Err(LedgerError::InvalidTemplate(msg)) => msg,
            other => panic!("expected InvalidTemplate, got {other:?}"),
        }
    }

    #[test]
    fn accepts_parameterized_entries() {
        let t = TxTemplate::create(
            base()
                .with_entry(leg(Direction::Debit, "params.amount"))
                .with_entry(leg(Direction::Credit, "params.amount")),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.code, "TRANSFER");
        assert_eq!(t.entries.len(), 2);
        assert_eq!(t.param("amount").map(|p| p.data_type), Some(ParamDataType::Decimal));
    }

    #[test]
    fn rejects_empty_entry_list() {
        assert!(invalid(base()).contains("at least one entry"));
    }

    #[test]
    fn rejects_undeclared_reference() {
        let msg = invalid(
            base()
                .with_entry(leg(Direction::Debit, "params.nope"))
                .with_entry(leg(Direction::Credit, "params.nope")),
        );
        assert!(msg.contains("undeclared parameter 'nope'"));
    }

    #[test]
    fn rejects_slot_type_mismatch() {
        let mut new = base()
            .with_entry(leg(Direction::Debit, "params.amount"))
            .with_entry(leg(Direction::Credit, "params.amount"));
        new.transaction.journal_id = "params.effective".into();
        assert!(invalid(new).contains("transaction.journal_id"));

        let new = base()
            .with_entry(leg(Direction::Debit, "'ten'"))
            .with_entry(leg(Direction::Credit, "params.amount"));
        assert!(invalid(new).contains("entries[0].units"));
    }

    #[test]
    fn rejects_duplicate_parameters() {
        let new = base()
            .with_param(NewParamDefinition::new("amount", ParamDataType::Decimal))
            .with_entry(leg(Direction::Debit, "params.amount"));
        assert!(invalid(new).contains("duplicate parameter"));
    }

    #[test]
    fn rejects_unbalanced_literal_entries() {
        let new = base()
            .with_entry(leg(Direction::Debit, "10.00"))
            .with_entry(leg(Direction::Credit, "9.99"));
        assert!(invalid(new).contains("never balance"));
    }

    #[test]
    fn balanced_literal_entries_are_fine() {
        let new = base()
            .with_entry(leg(Direction::Debit, "10"))
            .with_entry(leg(Direction::Credit, "10.00"));
        assert!(TxTemplate::create(new, Utc::now()).is_ok());
    }

    #[test]
    fn rejects_malformed_expressions() {
        let new = base()
            .with_entry(leg(Direction::Debit, "amount"))
            .with_entry(leg(Direction::Credit, "params.amount"));
        assert!(invalid(new).contains("invalid expression"));
    }

    #[test]
    fn rejects_bad_literal_currency() {
        let new = base()
            .with_entry(NewEntryTemplate::new(
                "XFER",
                uuid_lit(AccountId::new()),
                "'$$'",
                Direction::Debit,
                Layer::Settled,
                "params.amount",
            ))
            .with_entry(leg(Direction::Credit, "params.amount"));
        assert!(invalid(new).contains("entries[0].currency"));
    }

    #[test]
    fn serializes_expressions_as_source() {
        let t = TxTemplate::create(
            base()
                .with_entry(leg(Direction::Debit, "params.amount"))
                .with_entry(leg(Direction::Credit, "params.amount")),
            Utc::now(),
        )
        .unwrap();
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["entries"][0]["units"], "params.amount");
        let back: TxTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }
}
