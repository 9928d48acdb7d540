//! The ledger engine.
//!
//! `Ledger` is the single entry point a transport layer talks to. It composes
//! the pure template/posting logic from `tally-ledger` with a [`LedgerStore`]:
//!
//! 1. Resolve what the call refers to (template, journal, accounts)
//! 2. Run every deterministic check (binding, evaluation, balance by
//!    currency and layer)
//! 3. Hand the finished rows to the store, which commits them together with
//!    balance deltas and outbox records
//! 4. Wake outbox streams
//!
//! ## Error Semantics
//!
//! - **Validation failures** (steps 1-2) return before anything is written.
//! - **Idempotency**: a posting whose `external_id` already exists returns the
//!   stored transaction unchanged, including when a concurrent caller wins the
//!   uniqueness race during commit.
//! - **Contention**: `EngineError::ConcurrencyConflict` is the only retryable
//!   error; retrying is safe when the template sets an external id.
//! - **Overflow**: a running total that would leave the decimal range fails
//!   the whole posting with `EngineError::InvariantViolation`.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::field::{Empty, display};
use tracing::{Span, debug, info, instrument, trace};

use tally_core::{AccountId, Currency, JournalId, TransactionId};
use tally_events::{EventSequence, OutboxEvent};
use tally_ledger::{
    Account, AccountBalance, AccountUpdate, Entry, EntryCursor, Journal, JournalUpdate, LedgerEvent, NewAccount,
    NewJournal, NewTxTemplate, Params, Transaction, TxTemplate,
};

use crate::config::{LedgerConfig, OutboxConfig, StoreBackend};
use crate::error::{EngineError, EngineResult};
use crate::outbox::{OutboxPublisher, OutboxStream};
use crate::store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError};

/// One page of an account's entry history.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPage {
    pub entries: Vec<Entry>,
    /// Pass back as `after` to read the next page; `None` once a short page
    /// shows the history is exhausted.
    pub next: Option<EntryCursor>,
}

/// Double-entry ledger engine over a storage backend.
pub struct Ledger<S: ?Sized + LedgerStore = dyn LedgerStore> {
    store: Arc<S>,
    publisher: OutboxPublisher,
    outbox: OutboxConfig,
}

impl<S: ?Sized + LedgerStore> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            publisher: self.publisher.clone(),
            outbox: self.outbox,
        }
    }
}

impl<S: ?Sized + LedgerStore> std::fmt::Debug for Ledger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("outbox", &self.outbox).finish_non_exhaustive()
    }
}

impl Ledger<dyn LedgerStore> {
    /// Build the configured backend (connecting and migrating Postgres when
    /// selected).
    pub async fn from_config(config: &LedgerConfig) -> EngineResult<Self> {
        let store: Arc<dyn LedgerStore> = match &config.store {
            StoreBackend::Memory => {
                info!(backend = "memory", "ledger store ready");
                Arc::new(InMemoryLedgerStore::new())
            }
            StoreBackend::Postgres {
                database_url,
                max_connections,
                run_migrations,
            } => {
                let store = PostgresLedgerStore::connect(database_url, *max_connections).await?;
                if *run_migrations {
                    store.migrate().await?;
                }
                info!(backend = "postgres", max_connections, "ledger store ready");
                Arc::new(store)
            }
        };
        Ok(Ledger::new(store, config.outbox))
    }
}

impl<S: ?Sized + LedgerStore + 'static> Ledger<S> {
    pub fn new(store: Arc<S>, outbox: OutboxConfig) -> Self {
        Self {
            store,
            publisher: OutboxPublisher::new(),
            outbox,
        }
    }

    fn committed(&self, last: EventSequence) {
        trace!(last_sequence = last.value(), "outbox records committed");
        self.publisher.notify_committed();
    }

    // Journals

    #[instrument(name = "tally.create_journal", skip(self, new), fields(journal_id = %new.id), err)]
    pub async fn create_journal(&self, new: NewJournal) -> EngineResult<Journal> {
        let journal = Journal::create(new, Utc::now())?;
        let last = self.store.create_journal(&journal).await?;
        self.committed(last);
        info!(name = %journal.name, "journal created");
        Ok(journal)
    }

    #[instrument(name = "tally.find_journal", skip(self), err)]
    pub async fn find_journal(&self, id: JournalId) -> EngineResult<Journal> {
        self.store
            .find_journal(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("journal {id}")))
    }

    /// Apply descriptive changes. An update that changes nothing emits no event.
    #[instrument(name = "tally.update_journal", skip(self, update), err)]
    pub async fn update_journal(&self, id: JournalId, update: JournalUpdate) -> EngineResult<Journal> {
        let mut journal = self.find_journal(id).await?;
        let fields = journal.apply_update(update, Utc::now())?;
        if fields.is_empty() {
            return Ok(journal);
        }
        debug!(?fields, "journal fields changed");
        let last = self.store.update_journal(&journal, fields).await?;
        self.committed(last);
        Ok(journal)
    }

    // Accounts

    #[instrument(name = "tally.create_account", skip(self, new), fields(account_id = %new.id, code = %new.code), err)]
    pub async fn create_account(&self, new: NewAccount) -> EngineResult<Account> {
        let account = Account::create(new, Utc::now())?;
        let last = self.store.create_account(&account).await?;
        self.committed(last);
        info!(normal_balance = %account.normal_balance, "account created");
        Ok(account)
    }

    #[instrument(name = "tally.find_account", skip(self), err)]
    pub async fn find_account(&self, id: AccountId) -> EngineResult<Account> {
        self.store
            .find_account(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {id}")))
    }

    #[instrument(name = "tally.find_account_by_code", skip(self), err)]
    pub async fn find_account_by_code(&self, code: &str) -> EngineResult<Account> {
        self.store
            .find_account_by_code(code)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account code '{code}'")))
    }

    /// Apply descriptive changes; id, code and normal balance never change.
    #[instrument(name = "tally.update_account", skip(self, update), err)]
    pub async fn update_account(&self, id: AccountId, update: AccountUpdate) -> EngineResult<Account> {
        let mut account = self.find_account(id).await?;
        let fields = account.apply_update(update, Utc::now())?;
        if fields.is_empty() {
            return Ok(account);
        }
        debug!(?fields, "account fields changed");
        let last = self.store.update_account(&account, fields).await?;
        self.committed(last);
        Ok(account)
    }

    // Templates

    #[instrument(name = "tally.create_tx_template", skip(self, new), fields(code = %new.code), err)]
    pub async fn create_tx_template(&self, new: NewTxTemplate) -> EngineResult<TxTemplate> {
        let template = TxTemplate::create(new, Utc::now())?;
        let last = self.store.create_tx_template(&template).await?;
        self.committed(last);
        info!(
            params = template.params.len(),
            entries = template.entries.len(),
            "transaction template created"
        );
        Ok(template)
    }

    #[instrument(name = "tally.find_tx_template", skip(self), err)]
    pub async fn find_tx_template(&self, code: &str) -> EngineResult<TxTemplate> {
        self.store
            .find_tx_template(code)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("transaction template '{code}'")))
    }

    // Posting

    /// Post a transaction from the template `template_code`.
    ///
    /// Nothing is written unless every check passes. When the template
    /// resolves an `external_id` that is already stored, the stored transaction
    /// is returned and no new effects are produced.
    #[instrument(
        name = "tally.post_transaction",
        skip(self, params),
        fields(template_code = %template_code, transaction_id = Empty, external_id = Empty),
        err
    )]
    pub async fn post_transaction(&self, template_code: &str, params: Params) -> EngineResult<Transaction> {
        let span = Span::current();

        let template = self
            .store
            .find_tx_template(template_code)
            .await?
            .ok_or_else(|| EngineError::TemplateNotFound(template_code.to_string()))?;

        let bound = template.bind_params(&params)?;
        if !bound.ignored.is_empty() {
            debug!(ignored = ?bound.ignored, "ignoring undeclared parameters");
        }

        let header = template.resolve_header(&bound.params)?;
        if let Some(external_id) = &header.external_id {
            span.record("external_id", external_id.as_str());
            if let Some(existing) = self.store.find_transaction_by_external_id(external_id).await? {
                span.record("transaction_id", display(existing.id));
                info!("external id already posted, returning stored transaction");
                return Ok(existing);
            }
        }

        if self.store.find_journal(header.journal_id).await?.is_none() {
            return Err(EngineError::NotFound(format!("journal {}", header.journal_id)));
        }

        let entries = template.materialize_entries(&bound.params)?;
        self.ensure_accounts(entries.iter().map(|e| e.account_id)).await?;

        let transaction = Transaction::assemble(&template, header, entries, Utc::now())?;
        span.record("transaction_id", display(transaction.id));
        self.commit(transaction).await
    }

    /// Post the reversal of a committed transaction.
    ///
    /// The original stays untouched; the returned transaction mirrors every
    /// entry on the opposite side. A transaction can be voided once.
    #[instrument(name = "tally.void_transaction", skip(self), fields(transaction_id = Empty), err)]
    pub async fn void_transaction(&self, id: TransactionId) -> EngineResult<Transaction> {
        let original = self.find_transaction(id).await?;
        let reversal = original.reversal(Utc::now());
        Span::current().record("transaction_id", display(reversal.id));
        self.commit(reversal).await
    }

    async fn ensure_accounts(&self, ids: impl Iterator<Item = AccountId>) -> EngineResult<()> {
        let wanted: BTreeSet<AccountId> = ids.collect();
        let ids: Vec<AccountId> = wanted.iter().copied().collect();
        let found: BTreeSet<AccountId> = self
            .store
            .find_accounts(&ids)
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();
        match wanted.difference(&found).next() {
            Some(missing) => Err(EngineError::NotFound(format!("account {missing}"))),
            None => Ok(()),
        }
    }

    async fn commit(&self, transaction: Transaction) -> EngineResult<Transaction> {
        match self.store.commit_transaction(&transaction).await {
            Ok(committed) => {
                self.committed(committed.last_sequence);
                info!(
                    entries = committed.transaction.entries.len(),
                    balances = committed.balances.len(),
                    last_sequence = committed.last_sequence.value(),
                    "transaction committed"
                );
                Ok(committed.transaction)
            }
            Err(StoreError::DuplicateExternalId(msg)) => {
                let external_id = transaction.external_id.as_deref().unwrap_or_default();
                match self.store.find_transaction_by_external_id(external_id).await? {
                    Some(winner) => {
                        info!(winner = %winner.id, "lost external id race, returning stored transaction");
                        Ok(winner)
                    }
                    None => Err(EngineError::DuplicateExternalId(msg)),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(name = "tally.find_transaction", skip(self), err)]
    pub async fn find_transaction(&self, id: TransactionId) -> EngineResult<Transaction> {
        self.store
            .find_transaction(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("transaction {id}")))
    }

    #[instrument(name = "tally.find_transaction_by_external_id", skip(self), err)]
    pub async fn find_transaction_by_external_id(&self, external_id: &str) -> EngineResult<Transaction> {
        self.store
            .find_transaction_by_external_id(external_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("transaction with external id '{external_id}'")))
    }

    // Balances

    /// Per-layer balance of an account in one journal and currency. Accounts
    /// without postings read as zero.
    #[instrument(name = "tally.account_balance", skip(self), fields(currency = %currency), err)]
    pub async fn account_balance(
        &self,
        account_id: AccountId,
        journal_id: JournalId,
        currency: &Currency,
    ) -> EngineResult<AccountBalance> {
        let account = self.find_account(account_id).await?;
        let snapshots = self.store.load_balances(account_id, journal_id, currency).await?;
        Ok(AccountBalance::from_snapshots(
            account_id,
            journal_id,
            currency.clone(),
            account.normal_balance,
            snapshots,
        ))
    }

    // Entries

    /// Entries posted to an account across all journals, oldest first.
    #[instrument(name = "tally.list_account_entries", skip(self, after), fields(account_id = %account_id), err)]
    pub async fn list_account_entries(
        &self,
        account_id: AccountId,
        after: Option<EntryCursor>,
        limit: usize,
    ) -> EngineResult<EntryPage> {
        self.find_account(account_id).await?;
        let entries = self.store.list_account_entries(account_id, after, limit).await?;
        let next = match entries.last() {
            Some(last) if entries.len() == limit => Some(EntryCursor::from(last)),
            _ => None,
        };
        Ok(EntryPage { entries, next })
    }

    // Outbox

    /// Stream outbox records with sequence greater than `cursor`.
    ///
    /// Must be called inside a tokio runtime. The stream never ends on its
    /// own; drop it to stop reading.
    pub fn stream_outbox(&self, cursor: EventSequence) -> OutboxStream {
        debug!(cursor = cursor.value(), "opening outbox stream");
        OutboxStream::spawn(Arc::clone(&self.store), &self.publisher, cursor, self.outbox)
    }

    /// One page of outbox records with sequence greater than `cursor`.
    #[instrument(name = "tally.outbox_events_after", skip(self), fields(cursor = cursor.value()), err)]
    pub async fn outbox_events_after(
        &self,
        cursor: EventSequence,
        limit: usize,
    ) -> EngineResult<Vec<OutboxEvent<LedgerEvent>>> {
        Ok(self.store.load_outbox_after(cursor, limit).await?)
    }
}
