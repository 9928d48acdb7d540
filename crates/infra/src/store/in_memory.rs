use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tally_core::{AccountId, Currency, Entity, EntryId, JournalId, TransactionId};
use tally_events::{EventSequence, OutboxEvent};
use tally_ledger::{
    Account, BalanceAggregator, BalanceKey, BalanceSnapshot, Entry, EntryCursor, Journal, Layer, LedgerEvent,
    Transaction, TxTemplate,
};

use super::posting_events;
use super::r#trait::{CommittedPosting, LedgerStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    journals: HashMap<JournalId, Journal>,
    journal_codes: HashMap<String, JournalId>,
    accounts: HashMap<AccountId, Account>,
    account_codes: HashMap<String, AccountId>,
    templates: HashMap<String, TxTemplate>,
    transactions: HashMap<TransactionId, Transaction>,
    external_ids: HashMap<String, TransactionId>,
    /// original transaction -> the transaction voiding it
    voided: HashMap<TransactionId, TransactionId>,
    balances: BTreeMap<BalanceKey, BalanceSnapshot>,
    account_entries: BTreeMap<(AccountId, EntryCursor), Entry>,
    outbox: Vec<OutboxEvent<LedgerEvent>>,
}

impl State {
    fn append(&mut self, events: Vec<LedgerEvent>) -> EventSequence {
        let mut last = EventSequence::new(self.outbox.len() as u64);
        for event in events {
            last = last.next();
            self.outbox.push(OutboxEvent::record(last, event));
        }
        last
    }
}

fn put<E: Entity>(table: &mut HashMap<E::Id, E>, row: E) {
    table.insert(row.id(), row);
}

/// In-memory ledger store.
///
/// Intended for tests/dev and embedding. One lock guards all state, so every
/// call is trivially atomic and serialized.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_journal(&self, journal: &Journal) -> StoreResult<EventSequence> {
        let mut state = self.write()?;
        if state.journals.contains_key(&journal.id) {
            return Err(StoreError::DuplicateCode(format!("journal id {}", journal.id)));
        }
        if let Some(code) = &journal.code {
            if state.journal_codes.contains_key(code) {
                return Err(StoreError::DuplicateCode(format!("journal code '{code}'")));
            }
            state.journal_codes.insert(code.clone(), journal.id);
        }
        put(&mut state.journals, journal.clone());
        Ok(state.append(vec![LedgerEvent::JournalCreated {
            journal: journal.clone(),
        }]))
    }

    async fn find_journal(&self, id: JournalId) -> StoreResult<Option<Journal>> {
        Ok(self.read()?.journals.get(&id).cloned())
    }

    async fn update_journal(&self, journal: &Journal, fields: Vec<String>) -> StoreResult<EventSequence> {
        let mut state = self.write()?;
        if !state.journals.contains_key(&journal.id) {
            return Err(StoreError::NotFound(format!("journal {}", journal.id)));
        }
        put(&mut state.journals, journal.clone());
        Ok(state.append(vec![LedgerEvent::JournalUpdated {
            journal: journal.clone(),
            fields,
        }]))
    }

    async fn create_account(&self, account: &Account) -> StoreResult<EventSequence> {
        let mut state = self.write()?;
        if state.account_codes.contains_key(&account.code) {
            return Err(StoreError::DuplicateCode(format!("account code '{}'", account.code)));
        }
        if state.accounts.contains_key(&account.id) {
            return Err(StoreError::DuplicateCode(format!("account id {}", account.id)));
        }
        state.account_codes.insert(account.code.clone(), account.id);
        put(&mut state.accounts, account.clone());
        Ok(state.append(vec![LedgerEvent::AccountCreated {
            account: account.clone(),
        }]))
    }

    async fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn find_account_by_code(&self, code: &str) -> StoreResult<Option<Account>> {
        let state = self.read()?;
        Ok(state
            .account_codes
            .get(code)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn find_accounts(&self, ids: &[AccountId]) -> StoreResult<Vec<Account>> {
        let state = self.read()?;
        Ok(ids.iter().filter_map(|id| state.accounts.get(id)).cloned().collect())
    }

    async fn update_account(&self, account: &Account, fields: Vec<String>) -> StoreResult<EventSequence> {
        let mut state = self.write()?;
        if !state.accounts.contains_key(&account.id) {
            return Err(StoreError::NotFound(format!("account {}", account.id)));
        }
        put(&mut state.accounts, account.clone());
        Ok(state.append(vec![LedgerEvent::AccountUpdated {
            account: account.clone(),
            fields,
        }]))
    }

    async fn create_tx_template(&self, template: &TxTemplate) -> StoreResult<EventSequence> {
        let mut state = self.write()?;
        if state.templates.contains_key(&template.code) {
            return Err(StoreError::DuplicateCode(format!("tx template code '{}'", template.code)));
        }
        state.templates.insert(template.code.clone(), template.clone());
        Ok(state.append(vec![LedgerEvent::TxTemplateCreated {
            tx_template: template.clone(),
        }]))
    }

    async fn find_tx_template(&self, code: &str) -> StoreResult<Option<TxTemplate>> {
        Ok(self.read()?.templates.get(code).cloned())
    }

    async fn commit_transaction(&self, transaction: &Transaction) -> StoreResult<CommittedPosting> {
        let deltas = BalanceAggregator::deltas(&transaction.entries)
            .map_err(|e| StoreError::Invariant(format!("balance delta: {e}")))?;

        let mut state = self.write()?;

        // Validate everything before the first mutation.
        if let Some(ext) = &transaction.external_id {
            if state.external_ids.contains_key(ext) {
                return Err(StoreError::DuplicateExternalId(ext.clone()));
            }
        }
        if let Some(original) = transaction.reverses {
            if !state.transactions.contains_key(&original) {
                return Err(StoreError::NotFound(format!("transaction {original}")));
            }
            if state.voided.contains_key(&original) {
                return Err(StoreError::AlreadyVoided(original));
            }
        }
        let now = Utc::now();
        let mut balances = Vec::with_capacity(deltas.len());
        for delta in &deltas {
            let snapshot = BalanceAggregator::apply(state.balances.get(&delta.key), delta, transaction.id, now)
                .map_err(|e| StoreError::Invariant(format!("balance {}: {e}", delta.key.account_id)))?;
            balances.push(snapshot);
        }

        if let Some(ext) = &transaction.external_id {
            state.external_ids.insert(ext.clone(), transaction.id);
        }
        if let Some(original) = transaction.reverses {
            state.voided.insert(original, transaction.id);
        }
        for snapshot in &balances {
            state.balances.insert(snapshot.key(), snapshot.clone());
        }
        for entry in &transaction.entries {
            state
                .account_entries
                .insert((entry.account_id, EntryCursor::from(entry)), entry.clone());
        }
        put(&mut state.transactions, transaction.clone());
        let last_sequence = state.append(posting_events(transaction, &balances));

        Ok(CommittedPosting {
            transaction: transaction.clone(),
            balances,
            last_sequence,
        })
    }

    async fn find_transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        Ok(self.read()?.transactions.get(&id).cloned())
    }

    async fn find_transaction_by_external_id(&self, external_id: &str) -> StoreResult<Option<Transaction>> {
        let state = self.read()?;
        Ok(state
            .external_ids
            .get(external_id)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn list_account_entries(
        &self,
        account_id: AccountId,
        after: Option<EntryCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Entry>> {
        let state = self.read()?;
        let lower = match after {
            Some(cursor) => Bound::Excluded((account_id, cursor)),
            None => Bound::Included((
                account_id,
                EntryCursor {
                    created_at: DateTime::<Utc>::MIN_UTC,
                    id: EntryId::from(Uuid::nil()),
                },
            )),
        };
        Ok(state
            .account_entries
            .range((lower, Bound::Unbounded))
            .take_while(|((owner, _), _)| *owner == account_id)
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn load_balances(
        &self,
        account_id: AccountId,
        journal_id: JournalId,
        currency: &Currency,
    ) -> StoreResult<Vec<BalanceSnapshot>> {
        let state = self.read()?;
        Ok(Layer::ALL
            .iter()
            .filter_map(|layer| {
                state.balances.get(&BalanceKey {
                    account_id,
                    journal_id,
                    currency: currency.clone(),
                    layer: *layer,
                })
            })
            .cloned()
            .collect())
    }

    async fn load_outbox_after(
        &self,
        after: EventSequence,
        limit: usize,
    ) -> StoreResult<Vec<OutboxEvent<LedgerEvent>>> {
        let state = self.read()?;
        // Sequence n lives at index n - 1.
        let start = usize::try_from(after.value()).unwrap_or(usize::MAX);
        Ok(state.outbox.iter().skip(start).take(limit).cloned().collect())
    }
}
