//! Pure half of posting: parameter binding, header resolution, entry
//! materialization and the balance-by-(currency, layer) check.
//!
//! Nothing here touches storage. The caller sequences these steps around its
//! own lookups (idempotency by external id, journal/account existence).

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tally_core::{AccountId, Currency, JournalId, Units};

use crate::error::{LedgerError, LedgerResult};
use crate::expr::Expr;
use crate::param::{self, ParamDataType, ParamValue, Params};
use crate::primitives::{Direction, Layer};
use crate::tx_template::{TxTemplate, slot};

/// Transaction header after evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedHeader {
    pub journal_id: JournalId,
    pub effective: NaiveDate,
    pub correlation_id: Option<String>,
    pub external_id: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<JsonValue>,
}

/// One entry after evaluation, not yet assigned ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntry {
    pub entry_type: String,
    pub account_id: AccountId,
    pub currency: Currency,
    pub direction: Direction,
    pub layer: Layer,
    pub units: Units,
    pub description: Option<String>,
}

/// Bound parameters plus the supplied names the template does not declare.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParams {
    pub params: Params,
    pub ignored: Vec<String>,
}

fn mismatch(slot: &str, expected: ParamDataType, found: &ParamValue) -> LedgerError {
    LedgerError::TypeMismatch {
        slot: slot.to_string(),
        expected,
        found: found.data_type(),
    }
}

fn eval_uuid(expr: &Expr, slot: &str, params: &Params) -> LedgerResult<Uuid> {
    match expr.evaluate(slot, ParamDataType::Uuid, params)? {
        ParamValue::Uuid(u) => Ok(u),
        other => Err(mismatch(slot, ParamDataType::Uuid, &other)),
    }
}

fn eval_date(expr: &Expr, slot: &str, params: &Params) -> LedgerResult<NaiveDate> {
    match expr.evaluate(slot, ParamDataType::Date, params)? {
        ParamValue::Date(d) => Ok(d),
        other => Err(mismatch(slot, ParamDataType::Date, &other)),
    }
}

fn eval_string(expr: &Expr, slot: &str, params: &Params) -> LedgerResult<String> {
    match expr.evaluate(slot, ParamDataType::String, params)? {
        ParamValue::String(s) => Ok(s),
        other => Err(mismatch(slot, ParamDataType::String, &other)),
    }
}

fn eval_decimal(expr: &Expr, slot: &str, params: &Params) -> LedgerResult<Decimal> {
    match expr.evaluate(slot, ParamDataType::Decimal, params)? {
        ParamValue::Decimal(d) => Ok(d),
        other => Err(mismatch(slot, ParamDataType::Decimal, &other)),
    }
}

fn eval_json(expr: &Expr, slot: &str, params: &Params) -> LedgerResult<JsonValue> {
    match expr.evaluate(slot, ParamDataType::Json, params)? {
        ParamValue::Json(j) => Ok(j),
        other => Err(mismatch(slot, ParamDataType::Json, &other)),
    }
}

fn eval_opt_string(expr: Option<&Expr>, slot: &str, params: &Params) -> LedgerResult<Option<String>> {
    expr.map(|e| eval_string(e, slot, params)).transpose()
}

impl TxTemplate {
    pub fn bind_params(&self, supplied: &Params) -> LedgerResult<BoundParams> {
        let (params, ignored) = param::bind(&self.params, supplied)?;
        Ok(BoundParams { params, ignored })
    }

    pub fn resolve_header(&self, params: &Params) -> LedgerResult<ResolvedHeader> {
        let tx = &self.transaction;
        Ok(ResolvedHeader {
            journal_id: JournalId::from_uuid(eval_uuid(&tx.journal_id, slot::JOURNAL_ID.0, params)?),
            effective: eval_date(&tx.effective, slot::EFFECTIVE.0, params)?,
            correlation_id: eval_opt_string(tx.correlation_id.as_ref(), slot::CORRELATION_ID.0, params)?,
            external_id: eval_opt_string(tx.external_id.as_ref(), slot::EXTERNAL_ID.0, params)?,
            description: eval_opt_string(tx.description.as_ref(), slot::DESCRIPTION.0, params)?,
            metadata: tx
                .metadata
                .as_ref()
                .map(|e| eval_json(e, slot::METADATA.0, params))
                .transpose()?,
        })
    }

    /// Evaluate every entry template and check the result balances.
    pub fn materialize_entries(&self, params: &Params) -> LedgerResult<Vec<ResolvedEntry>> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for (i, e) in self.entries.iter().enumerate() {
            let account_id = AccountId::from_uuid(eval_uuid(&e.account_id, &slot::entry(i, "account_id"), params)?);

            let currency_text = eval_string(&e.currency, &slot::entry(i, "currency"), params)?;
            let currency = Currency::new(&currency_text)
                .map_err(|err| LedgerError::invalid_value(format!("{}: {err}", slot::entry(i, "currency"))))?;

            let raw_units = eval_decimal(&e.units, &slot::entry(i, "units"), params)?;
            let units = Units::new(raw_units).map_err(|_| LedgerError::NegativeUnits {
                entry: i,
                units: raw_units,
            })?;

            let description = eval_opt_string(e.description.as_ref(), &slot::entry(i, "description"), params)?;

            entries.push(ResolvedEntry {
                entry_type: e.entry_type.clone(),
                account_id,
                currency,
                direction: e.direction,
                layer: e.layer,
                units,
                description,
            });
        }

        check_balanced(
            entries
                .iter()
                .map(|e| (&e.currency, e.layer, e.direction, e.units.value())),
        )?;
        Ok(entries)
    }
}

/// Per (currency, layer), debits must equal credits exactly.
///
/// Groups are checked in (currency, layer) order so the reported group is
/// deterministic.
pub fn check_balanced<'a>(
    legs: impl IntoIterator<Item = (&'a Currency, Layer, Direction, Decimal)>,
) -> LedgerResult<()> {
    let mut totals: BTreeMap<(&Currency, Layer), (Decimal, Decimal)> = BTreeMap::new();
    for (currency, layer, direction, units) in legs {
        let (debits, credits) = totals.entry((currency, layer)).or_default();
        let side = match direction {
            Direction::Debit => debits,
            Direction::Credit => credits,
        };
        *side = side
            .checked_add(units)
            .ok_or_else(|| LedgerError::invalid_value(format!("{currency}/{layer} total overflows")))?;
    }

    for ((currency, layer), (debits, credits)) in totals {
        if debits != credits {
            return Err(LedgerError::UnbalancedTransaction {
                currency: currency.clone(),
                layer,
                debits,
                credits,
            });
        }
    }
    Ok(())
}
