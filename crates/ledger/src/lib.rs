//! Ledger domain: journals, accounts, transaction templates, posting and
//! balance aggregation.
//!
//! Pure domain logic only: no IO, no persistence concerns.

pub mod account;
pub mod balance;
pub mod error;
pub mod event;
pub mod expr;
pub mod journal;
pub mod param;
pub mod posting;
pub mod primitives;
pub mod transaction;
pub mod tx_template;

pub use account::{Account, AccountUpdate, Metadata, NewAccount};
pub use balance::{
    AccountBalance, BalanceAggregator, BalanceDelta, BalanceKey, BalanceSnapshot, LayerBalance,
    signed_normal_balance,
};
pub use error::{LedgerError, LedgerResult};
pub use event::LedgerEvent;
pub use expr::Expr;
pub use journal::{Journal, JournalUpdate, NewJournal};
pub use param::{NewParamDefinition, ParamDataType, ParamDefinition, ParamValue, Params};
pub use posting::{BoundParams, ResolvedEntry, ResolvedHeader, check_balanced};
pub use primitives::{Direction, Layer, NormalBalance};
pub use transaction::{Entry, EntryCursor, Transaction, VOID_ENTRY_SUFFIX};
pub use tx_template::{
    EntryTemplate, NewEntryTemplate, NewTxInput, NewTxTemplate, TxInputTemplate, TxTemplate,
};
