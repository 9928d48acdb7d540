//! Running balances per (account, journal, currency, layer).
//!
//! Totals only ever grow: a debit adds to `debit_total`, a credit to
//! `credit_total`. The signed "normal" balance is derived on read from the
//! account's normal-balance side.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{AccountId, Currency, JournalId, TransactionId, Units, ValueObject};

use crate::error::LedgerResult;
use crate::primitives::{Direction, Layer, NormalBalance};
use crate::transaction::Entry;

/// Identity of a balance row. Ordered so multi-key updates lock in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub account_id: AccountId,
    pub journal_id: JournalId,
    pub currency: Currency,
    pub layer: Layer,
}

/// Materialized totals for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub account_id: AccountId,
    pub journal_id: JournalId,
    pub currency: Currency,
    pub layer: Layer,
    pub debit_total: Units,
    pub credit_total: Units,
    /// Advances by one per committed transaction touching this key.
    pub version: u64,
    pub last_transaction_id: TransactionId,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn key(&self) -> BalanceKey {
        BalanceKey {
            account_id: self.account_id,
            journal_id: self.journal_id,
            currency: self.currency.clone(),
            layer: self.layer,
        }
    }

    pub fn normal_balance(&self, side: NormalBalance) -> Decimal {
        signed_normal_balance(side, self.debit_total, self.credit_total)
    }
}

/// Summed effect of one transaction on one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub key: BalanceKey,
    pub debit: Units,
    pub credit: Units,
}

impl ValueObject for BalanceKey {}
impl ValueObject for BalanceDelta {}

pub struct BalanceAggregator;

impl BalanceAggregator {
    /// Collapse a transaction's entries into one delta per touched key, in key order.
    pub fn deltas(entries: &[Entry]) -> LedgerResult<Vec<BalanceDelta>> {
        let mut by_key: BTreeMap<BalanceKey, BalanceDelta> = BTreeMap::new();
        for e in entries {
            let key = BalanceKey {
                account_id: e.account_id,
                journal_id: e.journal_id,
                currency: e.currency.clone(),
                layer: e.layer,
            };
            let delta = by_key.entry(key.clone()).or_insert_with(|| BalanceDelta {
                key,
                debit: Units::ZERO,
                credit: Units::ZERO,
            });
            match e.direction {
                Direction::Debit => delta.debit = delta.debit.checked_add(e.units)?,
                Direction::Credit => delta.credit = delta.credit.checked_add(e.units)?,
            }
        }
        Ok(by_key.into_values().collect())
    }

    /// Apply a delta on top of the current row, or a zero baseline when the key
    /// has never been posted to.
    pub fn apply(
        current: Option<&BalanceSnapshot>,
        delta: &BalanceDelta,
        transaction_id: TransactionId,
        now: DateTime<Utc>,
    ) -> LedgerResult<BalanceSnapshot> {
        let (debit, credit, version, created_at) = match current {
            Some(c) => (c.debit_total, c.credit_total, c.version, c.created_at),
            None => (Units::ZERO, Units::ZERO, 0, now),
        };
        Ok(BalanceSnapshot {
            account_id: delta.key.account_id,
            journal_id: delta.key.journal_id,
            currency: delta.key.currency.clone(),
            layer: delta.key.layer,
            debit_total: debit.checked_add(delta.debit)?,
            credit_total: credit.checked_add(delta.credit)?,
            version: version + 1,
            last_transaction_id: transaction_id,
            created_at,
            modified_at: now,
        })
    }
}

/// `debit - credit` for debit-normal accounts, `credit - debit` otherwise.
pub fn signed_normal_balance(side: NormalBalance, debit_total: Units, credit_total: Units) -> Decimal {
    match side {
        NormalBalance::Debit => debit_total.value() - credit_total.value(),
        NormalBalance::Credit => credit_total.value() - debit_total.value(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerBalance {
    pub debit_total: Units,
    pub credit_total: Units,
    pub normal_balance: Decimal,
    /// 0 when the layer has never been posted to.
    pub version: u64,
}

impl LayerBalance {
    pub fn zero() -> Self {
        Self {
            debit_total: Units::ZERO,
            credit_total: Units::ZERO,
            normal_balance: Decimal::ZERO,
            version: 0,
        }
    }

    /// Sum of two layers. The version of a rollup counts the updates of both.
    fn rollup(&self, other: &LayerBalance, side: NormalBalance) -> LedgerResult<LayerBalance> {
        let debit_total = self.debit_total.checked_add(other.debit_total)?;
        let credit_total = self.credit_total.checked_add(other.credit_total)?;
        Ok(LayerBalance {
            debit_total,
            credit_total,
            normal_balance: signed_normal_balance(side, debit_total, credit_total),
            version: self.version.saturating_add(other.version),
        })
    }
}

/// Read model for one account in one journal and currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub journal_id: JournalId,
    pub currency: Currency,
    pub normal_balance_side: NormalBalance,
    pub pending: LayerBalance,
    pub settled: LayerBalance,
}

impl AccountBalance {
    /// Build from whatever rows exist; missing layers read as zero.
    pub fn from_snapshots(
        account_id: AccountId,
        journal_id: JournalId,
        currency: Currency,
        side: NormalBalance,
        snapshots: impl IntoIterator<Item = BalanceSnapshot>,
    ) -> Self {
        let mut balance = Self {
            account_id,
            journal_id,
            currency,
            normal_balance_side: side,
            pending: LayerBalance::zero(),
            settled: LayerBalance::zero(),
        };
        for s in snapshots {
            if s.account_id != account_id || s.journal_id != journal_id || s.currency != balance.currency {
                continue;
            }
            let layer = LayerBalance {
                debit_total: s.debit_total,
                credit_total: s.credit_total,
                normal_balance: s.normal_balance(side),
                version: s.version,
            };
            match s.layer {
                Layer::Pending => balance.pending = layer,
                Layer::Settled => balance.settled = layer,
            }
        }
        balance
    }

    /// What the account has available when amounts up to `layer` count:
    /// `Settled` is the settled layer alone, `Pending` rolls pending on top of
    /// settled.
    pub fn available(&self, layer: Layer) -> LedgerResult<LayerBalance> {
        match layer {
            Layer::Settled => Ok(self.settled.clone()),
            Layer::Pending => self.settled.rollup(&self.pending, self.normal_balance_side),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use tally_core::EntryId;

    fn units(d: Decimal) -> Units {
        Units::new(d).unwrap()
    }

    fn entry(account: AccountId, journal: JournalId, direction: Direction, layer: Layer, amount: Decimal) -> Entry {
        Entry {
            id: EntryId::new(),
            transaction_id: TransactionId::new(),
            journal_id: journal,
            account_id: account,
            sequence: 1,
            entry_type: "T".into(),
            currency: Currency::new("USD").unwrap(),
            direction,
            layer,
            units: units(amount),
            description: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn deltas_sum_per_key_in_key_order() {
        let j = JournalId::new();
        let (a, b) = (AccountId::new(), AccountId::new());
        let entries = vec![
            entry(b, j, Direction::Credit, Layer::Settled, dec!(3)),
            entry(a, j, Direction::Debit, Layer::Settled, dec!(1)),
            entry(a, j, Direction::Debit, Layer::Settled, dec!(2)),
            entry(a, j, Direction::Credit, Layer::Pending, dec!(4)),
        ];
        let deltas = BalanceAggregator::deltas(&entries).unwrap();
        assert_eq!(deltas.len(), 3);
        let keys: Vec<_> = deltas.iter().map(|d| d.key.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let a_settled = deltas
            .iter()
            .find(|d| d.key.account_id == a && d.key.layer == Layer::Settled)
            .unwrap();
        assert_eq!(a_settled.debit.value(), dec!(3));
        assert!(a_settled.credit.is_zero());
    }

    #[test]
    fn apply_starts_from_zero_and_bumps_version() {
        let j = JournalId::new();
        let a = AccountId::new();
        let e = entry(a, j, Direction::Debit, Layer::Settled, dec!(9.53));
        let delta = &BalanceAggregator::deltas(std::slice::from_ref(&e)).unwrap()[0];

        let first = BalanceAggregator::apply(None, delta, e.transaction_id, Utc::now()).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.debit_total.value(), dec!(9.53));

        let second = BalanceAggregator::apply(Some(&first), delta, TransactionId::new(), Utc::now()).unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.debit_total.value(), dec!(19.06));
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn missing_layers_read_as_zero() {
        let usd = Currency::new("USD").unwrap();
        let bal = AccountBalance::from_snapshots(AccountId::new(), JournalId::new(), usd, NormalBalance::Credit, vec![]);
        assert_eq!(bal.settled, LayerBalance::zero());
        assert_eq!(bal.pending.version, 0);
    }

    #[test]
    fn available_rolls_pending_onto_settled() {
        let (a, j) = (AccountId::new(), JournalId::new());
        let usd = Currency::new("USD").unwrap();
        let snapshot = |layer, debit: Decimal, credit: Decimal, version| BalanceSnapshot {
            account_id: a,
            journal_id: j,
            currency: usd.clone(),
            layer,
            debit_total: units(debit),
            credit_total: units(credit),
            version,
            last_transaction_id: TransactionId::new(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
        };
        let bal = AccountBalance::from_snapshots(
            a,
            j,
            usd.clone(),
            NormalBalance::Credit,
            vec![
                snapshot(Layer::Settled, dec!(20), dec!(100), 3),
                snapshot(Layer::Pending, dec!(30), dec!(0), 1),
            ],
        );

        let settled = bal.available(Layer::Settled).unwrap();
        assert_eq!(settled, bal.settled);
        assert_eq!(settled.normal_balance, dec!(80));

        let pending = bal.available(Layer::Pending).unwrap();
        assert_eq!(pending.debit_total.value(), dec!(50));
        assert_eq!(pending.credit_total.value(), dec!(100));
        assert_eq!(pending.normal_balance, dec!(50));
        assert_eq!(pending.version, 4);
    }

    #[test]
    fn available_reports_overflow() {
        let (a, j) = (AccountId::new(), JournalId::new());
        let usd = Currency::new("USD").unwrap();
        let mut bal = AccountBalance::from_snapshots(a, j, usd, NormalBalance::Debit, vec![]);
        bal.settled.debit_total = units(Decimal::MAX);
        bal.pending.debit_total = units(dec!(1));
        assert!(matches!(
            bal.available(Layer::Pending),
            Err(crate::error::LedgerError::Domain(tally_core::DomainError::UnitsOverflow { .. }))
        ));
        assert!(bal.available(Layer::Settled).is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// The two normal-balance conventions are exact negations of each other
        /// and match the direct definition.
        #[test]
        fn normal_balance_sign_convention(dr in 0i64..10_000_000i64, cr in 0i64..10_000_000i64) {
            let d = units(Decimal::new(dr, 2));
            let c = units(Decimal::new(cr, 2));
            let debit_side = signed_normal_balance(NormalBalance::Debit, d, c);
            let credit_side = signed_normal_balance(NormalBalance::Credit, d, c);
            prop_assert_eq!(debit_side, d.value() - c.value());
            prop_assert_eq!(credit_side, c.value() - d.value());
            prop_assert_eq!(debit_side, -credit_side);
        }

        /// Applying per-transaction deltas in any order converges on the same totals.
        #[test]
        fn aggregation_is_order_independent(
            amounts in prop::collection::vec((1i64..100_000i64, any::<bool>()), 1..20),
        ) {
            let j = JournalId::new();
            let a = AccountId::new();
            let entries: Vec<Entry> = amounts
                .iter()
                .map(|(cents, debit)| {
                    let dir = if *debit { Direction::Debit } else { Direction::Credit };
                    entry(a, j, dir, Layer::Settled, Decimal::new(*cents, 2))
                })
                .collect();

            let fold = |order: Vec<&Entry>| {
                let mut current: Option<BalanceSnapshot> = None;
                for e in order {
                    let delta = &BalanceAggregator::deltas(std::slice::from_ref(e)).unwrap()[0];
                    current = Some(BalanceAggregator::apply(current.as_ref(), delta, e.transaction_id, Utc::now()).unwrap());
                }
                current.unwrap()
            };

            let forward = fold(entries.iter().collect());
            let backward = fold(entries.iter().rev().collect());
            prop_assert_eq!(forward.debit_total, backward.debit_total);
            prop_assert_eq!(forward.credit_total, backward.credit_total);
            prop_assert_eq!(forward.version, entries.len() as u64);
        }
    }
}
