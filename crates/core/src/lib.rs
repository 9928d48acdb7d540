//! `tally-core`: ledger foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, EntryId, JournalId, TransactionId, TxTemplateId};
pub use money::{Currency, Units};
pub use value_object::ValueObject;
