//! Outbox payloads: one variant per committed mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_events::Event;

use crate::account::Account;
use crate::balance::BalanceSnapshot;
use crate::journal::Journal;
use crate::transaction::Transaction;
use crate::tx_template::TxTemplate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    JournalCreated { journal: Journal },
    JournalUpdated { journal: Journal, fields: Vec<String> },
    AccountCreated { account: Account },
    AccountUpdated { account: Account, fields: Vec<String> },
    TxTemplateCreated { tx_template: TxTemplate },
    TransactionCreated { transaction: Transaction },
    BalanceCreated { balance: BalanceSnapshot },
    BalanceUpdated { balance: BalanceSnapshot },
}

impl LedgerEvent {
    /// Balance events for freshly applied snapshots (version 1 means created).
    pub fn for_balance(balance: BalanceSnapshot) -> Self {
        if balance.version == 1 {
            LedgerEvent::BalanceCreated { balance }
        } else {
            LedgerEvent::BalanceUpdated { balance }
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::JournalCreated { .. } => "ledger.journal.created",
            LedgerEvent::JournalUpdated { .. } => "ledger.journal.updated",
            LedgerEvent::AccountCreated { .. } => "ledger.account.created",
            LedgerEvent::AccountUpdated { .. } => "ledger.account.updated",
            LedgerEvent::TxTemplateCreated { .. } => "ledger.tx_template.created",
            LedgerEvent::TransactionCreated { .. } => "ledger.transaction.created",
            LedgerEvent::BalanceCreated { .. } => "ledger.balance.created",
            LedgerEvent::BalanceUpdated { .. } => "ledger.balance.updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::JournalCreated { journal } | LedgerEvent::JournalUpdated { journal, .. } => {
                journal.modified_at
            }
            LedgerEvent::AccountCreated { account } | LedgerEvent::AccountUpdated { account, .. } => {
                account.modified_at
            }
            LedgerEvent::TxTemplateCreated { tx_template } => tx_template.created_at,
            LedgerEvent::TransactionCreated { transaction } => transaction.created_at,
            LedgerEvent::BalanceCreated { balance } | LedgerEvent::BalanceUpdated { balance } => {
                balance.modified_at
            }
        }
    }
}
