//! Outbox event model shared by the ledger domain and storage backends.

pub mod envelope;
pub mod event;

pub use envelope::{EventSequence, OutboxEvent};
pub use event::Event;
