//! Outbox consumption: in-process commit wakeups, the streaming reader and
//! consumer cursor persistence.
//!
//! Records themselves are appended by the [`LedgerStore`](crate::store::LedgerStore)
//! inside the same atomic unit as the mutation that produced them; this module
//! only reads them back.

pub mod cursor_store;
pub mod stream;

pub use cursor_store::{InMemoryCursorStore, OutboxCursorStore, PostgresCursorStore};
pub use stream::{OutboxItem, OutboxStream};

use std::sync::Arc;

use tokio::sync::Notify;

/// Wakes outbox streams after a commit.
///
/// Wakeups are a latency optimization only: streams also poll, so commits made
/// by other processes are still observed.
#[derive(Debug, Clone, Default)]
pub struct OutboxPublisher {
    notify: Arc<Notify>,
}

impl OutboxPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every waiting stream that new records are committed.
    pub fn notify_committed(&self) {
        self.notify.notify_waiters();
    }

    pub(crate) fn handle(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}
