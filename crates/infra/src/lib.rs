//! Infrastructure layer: storage backends, the ledger engine, outbox streaming
//! and configuration.

pub mod config;
pub mod engine;
pub mod error;
pub mod outbox;
pub mod store;


pub use config::{ConfigError, LedgerConfig, OutboxConfig, StoreBackend};
pub use engine::{EntryPage, Ledger};
pub use error::{EngineError, EngineResult};
pub use outbox::{
    InMemoryCursorStore, OutboxCursorStore, OutboxItem, OutboxPublisher, OutboxStream, PostgresCursorStore,
};
pub use store::{
    CommittedPosting, InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError, StoreResult,
};
