//! Outbox consumer cursor persistence.
//!
//! A cursor is the last outbox sequence a named consumer has processed. This
//! enables:
//! - Resume after crash (the consumer restarts its stream from the cursor)
//! - At-least-once delivery (save only after the event is handled)
//! - Deterministic rebuilds (reset the cursor and replay from the beginning)

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use tally_events::EventSequence;

use crate::store::postgres::map_sqlx_error;
use crate::store::{StoreError, StoreResult};

/// Cursor store keyed by consumer name.
#[async_trait]
pub trait OutboxCursorStore: Send + Sync {
    /// Last processed sequence for `consumer`, or `EventSequence::BEGINNING`.
    async fn load(&self, consumer: &str) -> StoreResult<EventSequence>;

    async fn save(&self, consumer: &str, sequence: EventSequence) -> StoreResult<()>;

    /// Forget the consumer's position (next load returns the beginning).
    async fn reset(&self, consumer: &str) -> StoreResult<()>;
}

/// In-memory cursor store (lost on restart).
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<String, EventSequence>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxCursorStore for InMemoryCursorStore {
    async fn load(&self, consumer: &str) -> StoreResult<EventSequence> {
        let cursors = self
            .cursors
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(cursors.get(consumer).copied().unwrap_or(EventSequence::BEGINNING))
    }

    async fn save(&self, consumer: &str, sequence: EventSequence) -> StoreResult<()> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        cursors.insert(consumer.to_string(), sequence);
        Ok(())
    }

    async fn reset(&self, consumer: &str) -> StoreResult<()> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        cursors.remove(consumer);
        Ok(())
    }
}

/// Postgres-backed cursor store (`tally_outbox_cursors`).
#[derive(Debug, Clone)]
pub struct PostgresCursorStore {
    pool: Arc<PgPool>,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl OutboxCursorStore for PostgresCursorStore {
    #[instrument(skip(self), err)]
    async fn load(&self, consumer: &str) -> StoreResult<EventSequence> {
        let row = sqlx::query("SELECT sequence FROM tally_outbox_cursors WHERE consumer = $1")
            .bind(consumer)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_cursor", e))?;

        match row {
            Some(row) => {
                let seq: i64 = row
                    .try_get("sequence")
                    .map_err(|e| StoreError::Corrupt(format!("failed to read sequence: {e}")))?;
                Ok(EventSequence::new(seq as u64))
            }
            None => Ok(EventSequence::BEGINNING),
        }
    }

    #[instrument(skip(self), fields(sequence = sequence.value()), err)]
    async fn save(&self, consumer: &str, sequence: EventSequence) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tally_outbox_cursors (consumer, sequence)
            VALUES ($1, $2)
            ON CONFLICT (consumer)
            DO UPDATE SET
                sequence = EXCLUDED.sequence,
                updated_at = NOW()
            "#,
        )
        .bind(consumer)
        .bind(sequence.value() as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_cursor", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn reset(&self, consumer: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM tally_outbox_cursors WHERE consumer = $1")
            .bind(consumer)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("reset_cursor", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_cursor_defaults_saves_and_resets() {
        let store = InMemoryCursorStore::new();
        assert_eq!(store.load("mailer").await.unwrap(), EventSequence::BEGINNING);

        store.save("mailer", EventSequence::new(7)).await.unwrap();
        store.save("audit", EventSequence::new(2)).await.unwrap();
        assert_eq!(store.load("mailer").await.unwrap(), EventSequence::new(7));
        assert_eq!(store.load("audit").await.unwrap(), EventSequence::new(2));

        store.reset("mailer").await.unwrap();
        assert_eq!(store.load("mailer").await.unwrap(), EventSequence::BEGINNING);
        assert_eq!(store.load("audit").await.unwrap(), EventSequence::new(2));
    }
}
