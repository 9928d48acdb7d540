use async_trait::async_trait;
use thiserror::Error;

use tally_core::{AccountId, Currency, JournalId, TransactionId};
use tally_events::{EventSequence, OutboxEvent};
use tally_ledger::{Account, BalanceSnapshot, Entry, EntryCursor, Journal, LedgerEvent, Transaction, TxTemplate};

/// Storage operation error.
///
/// These are **infrastructure errors** (uniqueness, contention, connectivity)
/// as opposed to template/posting validation errors, which never reach storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate code: {0}")]
    DuplicateCode(String),

    #[error("duplicate external id: {0}")]
    DuplicateExternalId(String),

    #[error("transaction {0} is already voided")]
    AlreadyVoided(TransactionId),

    /// Lost a race on a versioned row; the whole unit was rolled back.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Applying the transaction would break a ledger invariant (a running
    /// total overflowing). The unit was rolled back; retrying fails the same way.
    #[error("ledger invariant violated: {0}")]
    Invariant(String),

    /// The backend could not be reached (pool closed, IO, lock poisoned).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What one committed posting changed.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedPosting {
    pub transaction: Transaction,
    /// Post-commit snapshots of every touched key, in key order.
    pub balances: Vec<BalanceSnapshot>,
    /// Sequence of the last outbox record appended by the commit.
    pub last_sequence: EventSequence,
}

/// Transactional storage for the ledger.
///
/// ## Atomicity
///
/// Every mutating call is one atomic unit together with the outbox records it
/// produces: either the rows and their outbox records are all committed, or
/// nothing is. Outbox sequences are assigned inside that unit, so sequence order
/// is commit order.
///
/// ## Balances
///
/// `commit_transaction` applies the transaction's balance deltas under per-key
/// serialization (row locks or a single writer), so concurrent postings against
/// the same (account, journal, currency, layer) never lose updates.
///
/// ## Lookups
///
/// `find_*` return `Ok(None)` on a miss; callers decide whether that is an error.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a journal. Fails `DuplicateCode` when its code is taken.
    async fn create_journal(&self, journal: &Journal) -> StoreResult<EventSequence>;

    async fn find_journal(&self, id: JournalId) -> StoreResult<Option<Journal>>;

    /// Overwrite a journal's descriptive fields. `fields` names what changed.
    async fn update_journal(&self, journal: &Journal, fields: Vec<String>) -> StoreResult<EventSequence>;

    /// Insert an account. Fails `DuplicateCode` when its code is taken.
    async fn create_account(&self, account: &Account) -> StoreResult<EventSequence>;

    async fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn find_account_by_code(&self, code: &str) -> StoreResult<Option<Account>>;

    /// Load every listed account that exists.
    async fn find_accounts(&self, ids: &[AccountId]) -> StoreResult<Vec<Account>>;

    async fn update_account(&self, account: &Account, fields: Vec<String>) -> StoreResult<EventSequence>;

    /// Insert a template. Fails `DuplicateCode` when its code is taken.
    async fn create_tx_template(&self, template: &TxTemplate) -> StoreResult<EventSequence>;

    async fn find_tx_template(&self, code: &str) -> StoreResult<Option<TxTemplate>>;

    /// Persist a transaction, its entries, balance deltas and outbox records.
    ///
    /// Fails `DuplicateExternalId` when another transaction holds the external
    /// id and `AlreadyVoided` when `transaction.reverses` was already voided.
    async fn commit_transaction(&self, transaction: &Transaction) -> StoreResult<CommittedPosting>;

    async fn find_transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>>;

    async fn find_transaction_by_external_id(&self, external_id: &str) -> StoreResult<Option<Transaction>>;

    /// Entries posted to `account_id` strictly after `after` (from the start
    /// when `None`), ascending by [`EntryCursor`], at most `limit`.
    async fn list_account_entries(
        &self,
        account_id: AccountId,
        after: Option<EntryCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Entry>>;

    /// Every layer's snapshot for (account, journal, currency) that exists.
    async fn load_balances(
        &self,
        account_id: AccountId,
        journal_id: JournalId,
        currency: &Currency,
    ) -> StoreResult<Vec<BalanceSnapshot>>;

    /// Outbox records with sequence > `after`, ascending, at most `limit`.
    async fn load_outbox_after(
        &self,
        after: EventSequence,
        limit: usize,
    ) -> StoreResult<Vec<OutboxEvent<LedgerEvent>>>;
}
