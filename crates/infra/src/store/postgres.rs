//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation on `*_code_key`) | `23505` | `DuplicateCode` | code already taken |
//! | Database (unique violation on `external_id`) | `23505` | `DuplicateExternalId` | idempotent re-post / lost race |
//! | Database (unique violation on `reverses`) | `23505` | `AlreadyVoided` | second void |
//! | Database (other unique violation) | `23505` | `Concurrency` | concurrent insert of the same row |
//! | Database (foreign key violation) | `23503` | `NotFound` | referenced journal/account/template missing |
//! | Database (serialization / deadlock) | `40001` / `40P01` | `Concurrency` | retryable contention |
//! | Database (other) | Any other | `Unavailable` | |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` | |
//!
//! ## Balance Serialization
//!
//! `commit_transaction` locks the touched balance rows with `SELECT ... FOR
//! UPDATE` in key order (a zero row is inserted first if the key is new), so
//! concurrent postings on the same key queue up instead of losing updates and
//! never deadlock against each other. A total that would overflow aborts the
//! whole unit with `Invariant`.
//!
//! ## Outbox Ordering
//!
//! Appends take a transaction-scoped advisory lock before reading
//! `MAX(sequence)`, so sequences are gap-free and follow commit order.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction as PgTransaction};
use tracing::field::Empty;
use tracing::{Span, instrument};
use uuid::Uuid;

use tally_core::{AccountId, Currency, EntryId, JournalId, TransactionId, TxTemplateId, Units};
use tally_events::{Event, EventSequence, OutboxEvent};
use tally_ledger::{
    Account, BalanceAggregator, BalanceSnapshot, Entry, EntryCursor, Journal, LedgerEvent, Metadata, Transaction,
    TxTemplate,
};

use super::posting_events;
use super::r#trait::{CommittedPosting, LedgerStore, StoreError, StoreResult};

pub(crate) const SCHEMA: &str = include_str!("schema.sql");

/// Advisory lock key serializing outbox appends ("tallyobx").
const OUTBOX_LOCK_KEY: i64 = 0x7461_6c6c_796f_6278;

/// Postgres-backed ledger store.
///
/// `Send + Sync`; all operations go through the SQLx pool and every mutation
/// runs in one database transaction together with its outbox records.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the ledger tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self) -> StoreResult<PgTransaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn load_entries(&self, transaction_id: TransactionId) -> StoreResult<Vec<Entry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM tally_entries WHERE transaction_id = $1 ORDER BY sequence ASC"
        ))
        .bind(transaction_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_entries", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn transaction_with_entries(&self, row: Option<PgRow>) -> StoreResult<Option<Transaction>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let mut transaction = transaction_from_row(&row)?;
        transaction.entries = self.load_entries(transaction.id).await?;
        Ok(Some(transaction))
    }
}

const TRANSACTION_COLUMNS: &str = "id, tx_template_id, template_code, journal_id, correlation_id, external_id, \
     effective, description, metadata, reverses, created_at";

const ENTRY_COLUMNS: &str = "id, transaction_id, journal_id, account_id, sequence, entry_type, currency, \
     direction, layer, units, description, created_at";

const BALANCE_COLUMNS: &str = "account_id, journal_id, currency, layer, debit_total, credit_total, version, \
     last_transaction_id, created_at, modified_at";

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, journal), fields(journal_id = %journal.id), err)]
    async fn create_journal(&self, journal: &Journal) -> StoreResult<EventSequence> {
        let mut tx = self.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO tally_journals (id, name, code, description, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(journal.id.as_uuid())
        .bind(&journal.name)
        .bind(&journal.code)
        .bind(&journal.description)
        .bind(journal.created_at)
        .bind(journal.modified_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_journal", e))?;

        let seq = append_outbox(
            &mut tx,
            vec![LedgerEvent::JournalCreated {
                journal: journal.clone(),
            }],
        )
        .await?;
        commit(tx).await?;
        Ok(seq)
    }

    #[instrument(skip(self), fields(journal_id = %id), err)]
    async fn find_journal(&self, id: JournalId) -> StoreResult<Option<Journal>> {
        let row = sqlx::query(
            "SELECT id, name, code, description, created_at, modified_at FROM tally_journals WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_journal", e))?;
        row.as_ref().map(journal_from_row).transpose()
    }

    #[instrument(skip(self, journal, fields), fields(journal_id = %journal.id), err)]
    async fn update_journal(&self, journal: &Journal, fields: Vec<String>) -> StoreResult<EventSequence> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            "UPDATE tally_journals SET name = $2, description = $3, modified_at = $4 WHERE id = $1",
        )
        .bind(journal.id.as_uuid())
        .bind(&journal.name)
        .bind(&journal.description)
        .bind(journal.modified_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_journal", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("journal {}", journal.id)));
        }

        let seq = append_outbox(
            &mut tx,
            vec![LedgerEvent::JournalUpdated {
                journal: journal.clone(),
                fields,
            }],
        )
        .await?;
        commit(tx).await?;
        Ok(seq)
    }

    #[instrument(skip(self, account), fields(account_id = %account.id, code = %account.code), err)]
    async fn create_account(&self, account: &Account) -> StoreResult<EventSequence> {
        let metadata = serde_json::to_value(&account.metadata)
            .map_err(|e| StoreError::Corrupt(format!("account metadata: {e}")))?;

        let mut tx = self.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO tally_accounts (id, code, name, normal_balance, description, metadata, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.normal_balance.as_str())
        .bind(&account.description)
        .bind(&metadata)
        .bind(account.created_at)
        .bind(account.modified_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_account", e))?;

        let seq = append_outbox(
            &mut tx,
            vec![LedgerEvent::AccountCreated {
                account: account.clone(),
            }],
        )
        .await?;
        commit(tx).await?;
        Ok(seq)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, name, normal_balance, description, metadata, created_at, modified_at
            FROM tally_accounts WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_account", e))?;
        row.as_ref().map(account_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_account_by_code(&self, code: &str) -> StoreResult<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, name, normal_balance, description, metadata, created_at, modified_at
            FROM tally_accounts WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_account_by_code", e))?;
        row.as_ref().map(account_from_row).transpose()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn find_accounts(&self, ids: &[AccountId]) -> StoreResult<Vec<Account>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, code, name, normal_balance, description, metadata, created_at, modified_at
            FROM tally_accounts WHERE id = ANY($1)
            "#,
        )
        .bind(&uuids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_accounts", e))?;
        rows.iter().map(account_from_row).collect()
    }

    #[instrument(skip(self, account, fields), fields(account_id = %account.id), err)]
    async fn update_account(&self, account: &Account, fields: Vec<String>) -> StoreResult<EventSequence> {
        let metadata = serde_json::to_value(&account.metadata)
            .map_err(|e| StoreError::Corrupt(format!("account metadata: {e}")))?;

        let mut tx = self.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE tally_accounts
            SET name = $2, description = $3, metadata = $4, modified_at = $5
            WHERE id = $1
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(&account.name)
        .bind(&account.description)
        .bind(&metadata)
        .bind(account.modified_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_account", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("account {}", account.id)));
        }

        let seq = append_outbox(
            &mut tx,
            vec![LedgerEvent::AccountUpdated {
                account: account.clone(),
                fields,
            }],
        )
        .await?;
        commit(tx).await?;
        Ok(seq)
    }

    #[instrument(skip(self, template), fields(code = %template.code), err)]
    async fn create_tx_template(&self, template: &TxTemplate) -> StoreResult<EventSequence> {
        let definition =
            serde_json::to_value(template).map_err(|e| StoreError::Corrupt(format!("template definition: {e}")))?;

        let mut tx = self.begin().await?;
        sqlx::query(
            "INSERT INTO tally_tx_templates (id, code, definition, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(template.id.as_uuid())
        .bind(&template.code)
        .bind(&definition)
        .bind(template.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_tx_template", e))?;

        let seq = append_outbox(
            &mut tx,
            vec![LedgerEvent::TxTemplateCreated {
                tx_template: template.clone(),
            }],
        )
        .await?;
        commit(tx).await?;
        Ok(seq)
    }

    #[instrument(skip(self), err)]
    async fn find_tx_template(&self, code: &str) -> StoreResult<Option<TxTemplate>> {
        let row = sqlx::query("SELECT definition FROM tally_tx_templates WHERE code = $1")
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_tx_template", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let definition: JsonValue = get(&row, "definition")?;
        serde_json::from_value(definition)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("template definition: {e}")))
    }

    #[instrument(
        skip(self, transaction),
        fields(
            transaction_id = %transaction.id,
            entry_count = transaction.entries.len(),
            balance_count = Empty,
            last_sequence = Empty
        ),
        err
    )]
    async fn commit_transaction(&self, transaction: &Transaction) -> StoreResult<CommittedPosting> {
        let span = Span::current();
        let deltas = BalanceAggregator::deltas(&transaction.entries)
            .map_err(|e| StoreError::Invariant(format!("balance delta: {e}")))?;
        let now = Utc::now();

        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tally_transactions (
                id, tx_template_id, template_code, journal_id, correlation_id, external_id,
                effective, description, metadata, reverses, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.tx_template_id.as_uuid())
        .bind(&transaction.template_code)
        .bind(transaction.journal_id.as_uuid())
        .bind(&transaction.correlation_id)
        .bind(&transaction.external_id)
        .bind(transaction.effective)
        .bind(&transaction.description)
        .bind(&transaction.metadata)
        .bind(transaction.reverses.map(Uuid::from))
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match (constraint_of(&e).as_deref(), transaction.reverses) {
            (Some("tally_transactions_reverses_key"), Some(original)) => StoreError::AlreadyVoided(original),
            _ => map_sqlx_error("insert_transaction", e),
        })?;

        for entry in &transaction.entries {
            sqlx::query(
                r#"
                INSERT INTO tally_entries (
                    id, transaction_id, journal_id, account_id, sequence, entry_type,
                    currency, direction, layer, units, description, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(entry.transaction_id.as_uuid())
            .bind(entry.journal_id.as_uuid())
            .bind(entry.account_id.as_uuid())
            .bind(entry.sequence as i32)
            .bind(&entry.entry_type)
            .bind(entry.currency.code())
            .bind(entry.direction.as_str())
            .bind(entry.layer.as_str())
            .bind(entry.units.value())
            .bind(&entry.description)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_entry", e))?;
        }

        // Deltas come in key order; locking in that order keeps postings deadlock-free.
        let mut balances = Vec::with_capacity(deltas.len());
        for delta in &deltas {
            let key = &delta.key;
            sqlx::query(
                r#"
                INSERT INTO tally_balances (account_id, journal_id, currency, layer, created_at, modified_at)
                VALUES ($1, $2, $3, $4, $5, $5)
                ON CONFLICT (account_id, journal_id, currency, layer) DO NOTHING
                "#,
            )
            .bind(key.account_id.as_uuid())
            .bind(key.journal_id.as_uuid())
            .bind(key.currency.code())
            .bind(key.layer.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("ensure_balance_row", e))?;

            let row = sqlx::query(&format!(
                "SELECT {BALANCE_COLUMNS} FROM tally_balances \
                 WHERE account_id = $1 AND journal_id = $2 AND currency = $3 AND layer = $4 \
                 FOR UPDATE"
            ))
            .bind(key.account_id.as_uuid())
            .bind(key.journal_id.as_uuid())
            .bind(key.currency.code())
            .bind(key.layer.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_balance", e))?;

            let locked_version: i64 = get(&row, "version")?;
            let current = if locked_version == 0 {
                None
            } else {
                Some(balance_from_row(&row)?)
            };
            let next = BalanceAggregator::apply(current.as_ref(), delta, transaction.id, now)
                .map_err(|e| StoreError::Invariant(format!("balance {}: {e}", key.account_id)))?;

            sqlx::query(
                r#"
                UPDATE tally_balances
                SET debit_total = $5, credit_total = $6, version = $7,
                    last_transaction_id = $8, created_at = $9, modified_at = $10
                WHERE account_id = $1 AND journal_id = $2 AND currency = $3 AND layer = $4
                "#,
            )
            .bind(key.account_id.as_uuid())
            .bind(key.journal_id.as_uuid())
            .bind(key.currency.code())
            .bind(key.layer.as_str())
            .bind(next.debit_total.value())
            .bind(next.credit_total.value())
            .bind(next.version as i64)
            .bind(next.last_transaction_id.as_uuid())
            .bind(next.created_at)
            .bind(next.modified_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_balance", e))?;
            balances.push(next);
        }

        let last_sequence = append_outbox(&mut tx, posting_events(transaction, &balances)).await?;
        commit(tx).await?;

        span.record("balance_count", balances.len());
        span.record("last_sequence", last_sequence.value());
        Ok(CommittedPosting {
            transaction: transaction.clone(),
            balances,
            last_sequence,
        })
    }

    #[instrument(skip(self), fields(transaction_id = %id), err)]
    async fn find_transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query(&format!("SELECT {TRANSACTION_COLUMNS} FROM tally_transactions WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_transaction", e))?;
        self.transaction_with_entries(row).await
    }

    #[instrument(skip(self), err)]
    async fn find_transaction_by_external_id(&self, external_id: &str) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM tally_transactions WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_transaction_by_external_id", e))?;
        self.transaction_with_entries(row).await
    }

    #[instrument(skip(self), fields(account_id = %account_id, limit = limit), err)]
    async fn list_account_entries(
        &self,
        account_id: AccountId,
        after: Option<EntryCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Entry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        // Without a cursor $2 is NULL and every row of the account matches.
        let (after_time, after_id) = match after {
            Some(cursor) => (Some(cursor.created_at), *cursor.id.as_uuid()),
            None => (None, Uuid::nil()),
        };
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM tally_entries \
             WHERE account_id = $1 \
               AND ($2::timestamptz IS NULL OR (created_at, id) > ($2, $3)) \
             ORDER BY created_at ASC, id ASC LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.as_uuid())
            .bind(after_time)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_account_entries", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self), fields(account_id = %account_id, journal_id = %journal_id, currency = %currency), err)]
    async fn load_balances(
        &self,
        account_id: AccountId,
        journal_id: JournalId,
        currency: &Currency,
    ) -> StoreResult<Vec<BalanceSnapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM tally_balances \
             WHERE account_id = $1 AND journal_id = $2 AND currency = $3 AND version > 0 \
             ORDER BY layer"
        ))
        .bind(account_id.as_uuid())
        .bind(journal_id.as_uuid())
        .bind(currency.code())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_balances", e))?;
        rows.iter().map(balance_from_row).collect()
    }

    #[instrument(skip(self), fields(after = after.value(), limit = limit), err)]
    async fn load_outbox_after(
        &self,
        after: EventSequence,
        limit: usize,
    ) -> StoreResult<Vec<OutboxEvent<LedgerEvent>>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, id, event_type, event_version, payload, recorded_at
            FROM tally_outbox_events
            WHERE sequence > $1
            ORDER BY sequence ASC
            LIMIT $2
            "#,
        )
        .bind(after.value() as i64)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_outbox_after", e))?;
        rows.iter().map(outbox_from_row).collect()
    }
}

async fn commit(tx: PgTransaction<'static, Postgres>) -> StoreResult<()> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

/// Append outbox records inside `tx`, returning the last assigned sequence.
async fn append_outbox(
    tx: &mut PgTransaction<'static, Postgres>,
    events: Vec<LedgerEvent>,
) -> StoreResult<EventSequence> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(OUTBOX_LOCK_KEY)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_outbox", e))?;

    let row = sqlx::query("SELECT COALESCE(MAX(sequence), 0) AS last FROM tally_outbox_events")
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("outbox_head", e))?;
    let mut last = EventSequence::new(get::<i64>(&row, "last")? as u64);

    for event in events {
        last = last.next();
        let record = OutboxEvent::record(last, event);
        let payload = serde_json::to_value(record.payload())
            .map_err(|e| StoreError::Corrupt(format!("outbox payload: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO tally_outbox_events (sequence, id, event_type, event_version, payload, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(last.value() as i64)
        .bind(record.id())
        .bind(record.event_type())
        .bind(record.event_version() as i32)
        .bind(&payload)
        .bind(record.recorded_at())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_outbox_event", e))?;
    }
    Ok(last)
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            let constraint = db_err.constraint().unwrap_or_default().to_string();
            match db_err.code().as_deref() {
                Some("23505") if constraint == "tally_transactions_external_id_key" => {
                    StoreError::DuplicateExternalId(msg)
                }
                Some("23505") if constraint.ends_with("_code_key") => StoreError::DuplicateCode(msg),
                Some("23505") => StoreError::Concurrency(msg),
                Some("23503") => StoreError::NotFound(msg),
                Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => StoreError::Unavailable(format!("connection pool timed out in {operation}")),
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("unexpected row not found in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("sqlx error in {operation}: {err}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

fn constraint_of(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.constraint().map(str::to_string);
    }
    None
}

// Row decoding

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("failed to read {column}: {e}")))
}

fn parse<T>(text: String, column: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    text.parse()
        .map_err(|e| StoreError::Corrupt(format!("bad {column} '{text}': {e}")))
}

fn currency(row: &PgRow) -> StoreResult<Currency> {
    parse(get::<String>(row, "currency")?, "currency")
}

fn units(row: &PgRow, column: &str) -> StoreResult<Units> {
    Units::new(get::<Decimal>(row, column)?).map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn journal_from_row(row: &PgRow) -> StoreResult<Journal> {
    Ok(Journal {
        id: JournalId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        code: get(row, "code")?,
        description: get(row, "description")?,
        created_at: get(row, "created_at")?,
        modified_at: get(row, "modified_at")?,
    })
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    let metadata: JsonValue = get(row, "metadata")?;
    let metadata: Metadata =
        serde_json::from_value(metadata).map_err(|e| StoreError::Corrupt(format!("account metadata: {e}")))?;
    Ok(Account {
        id: AccountId::from_uuid(get(row, "id")?),
        code: get(row, "code")?,
        name: get(row, "name")?,
        normal_balance: parse(get::<String>(row, "normal_balance")?, "normal_balance")?,
        description: get(row, "description")?,
        metadata,
        created_at: get(row, "created_at")?,
        modified_at: get(row, "modified_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> StoreResult<Transaction> {
    let reverses: Option<Uuid> = get(row, "reverses")?;
    let effective: NaiveDate = get(row, "effective")?;
    Ok(Transaction {
        id: TransactionId::from_uuid(get(row, "id")?),
        tx_template_id: TxTemplateId::from_uuid(get(row, "tx_template_id")?),
        template_code: get(row, "template_code")?,
        journal_id: JournalId::from_uuid(get(row, "journal_id")?),
        correlation_id: get(row, "correlation_id")?,
        external_id: get(row, "external_id")?,
        effective,
        description: get(row, "description")?,
        metadata: get(row, "metadata")?,
        reverses: reverses.map(TransactionId::from_uuid),
        created_at: get(row, "created_at")?,
        entries: Vec::new(),
    })
}

fn entry_from_row(row: &PgRow) -> StoreResult<Entry> {
    Ok(Entry {
        id: EntryId::from_uuid(get(row, "id")?),
        transaction_id: TransactionId::from_uuid(get(row, "transaction_id")?),
        journal_id: JournalId::from_uuid(get(row, "journal_id")?),
        account_id: AccountId::from_uuid(get(row, "account_id")?),
        sequence: get::<i32>(row, "sequence")? as u32,
        entry_type: get(row, "entry_type")?,
        currency: currency(row)?,
        direction: parse(get::<String>(row, "direction")?, "direction")?,
        layer: parse(get::<String>(row, "layer")?, "layer")?,
        units: units(row, "units")?,
        description: get(row, "description")?,
        created_at: get(row, "created_at")?,
    })
}

fn balance_from_row(row: &PgRow) -> StoreResult<BalanceSnapshot> {
    let last: Option<Uuid> = get(row, "last_transaction_id")?;
    let last = last.ok_or_else(|| StoreError::Corrupt("balance row without last_transaction_id".to_string()))?;
    let created_at: DateTime<Utc> = get(row, "created_at")?;
    Ok(BalanceSnapshot {
        account_id: AccountId::from_uuid(get(row, "account_id")?),
        journal_id: JournalId::from_uuid(get(row, "journal_id")?),
        currency: currency(row)?,
        layer: parse(get::<String>(row, "layer")?, "layer")?,
        debit_total: units(row, "debit_total")?,
        credit_total: units(row, "credit_total")?,
        version: get::<i64>(row, "version")? as u64,
        last_transaction_id: TransactionId::from_uuid(last),
        created_at,
        modified_at: get(row, "modified_at")?,
    })
}

fn outbox_from_row(row: &PgRow) -> StoreResult<OutboxEvent<LedgerEvent>> {
    let payload: JsonValue = get(row, "payload")?;
    let payload: LedgerEvent =
        serde_json::from_value(payload).map_err(|e| StoreError::Corrupt(format!("outbox payload: {e}")))?;
    let event_type: String = get(row, "event_type")?;
    if event_type != payload.event_type() {
        return Err(StoreError::Corrupt(format!(
            "outbox event_type '{event_type}' does not match payload '{}'",
            payload.event_type()
        )));
    }
    Ok(OutboxEvent::new(
        get(row, "id")?,
        EventSequence::new(get::<i64>(row, "sequence")? as u64),
        event_type,
        get::<i32>(row, "event_version")? as u32,
        get(row, "recorded_at")?,
        payload,
    ))
}
