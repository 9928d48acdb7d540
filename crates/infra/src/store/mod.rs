//! Transactional storage boundary for the ledger.
//!
//! This module defines the storage-facing abstraction the engine commits
//! through, plus in-memory and Postgres implementations.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{CommittedPosting, LedgerStore, StoreError, StoreResult};

use tally_ledger::{BalanceSnapshot, LedgerEvent, Transaction};

/// Outbox payloads for a committed posting: the transaction first, then one
/// balance record per touched key in key order.
pub(crate) fn posting_events(transaction: &Transaction, balances: &[BalanceSnapshot]) -> Vec<LedgerEvent> {
    let mut events = Vec::with_capacity(1 + balances.len());
    events.push(LedgerEvent::TransactionCreated {
        transaction: transaction.clone(),
    });
    events.extend(balances.iter().cloned().map(LedgerEvent::for_balance));
    events
}
