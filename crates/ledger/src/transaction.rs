use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tally_core::{AccountId, Currency, Entity, EntryId, JournalId, TransactionId, TxTemplateId, Units};

use crate::error::{LedgerError, LedgerResult};
use crate::posting::{ResolvedEntry, ResolvedHeader};
use crate::primitives::{Direction, Layer};
use crate::tx_template::TxTemplate;

/// Suffix appended to the entry type of every mirrored entry in a void.
pub const VOID_ENTRY_SUFFIX: &str = "_VOID";

/// One leg of a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub transaction_id: TransactionId,
    pub journal_id: JournalId,
    pub account_id: AccountId,
    /// 1-based position within the transaction.
    pub sequence: u32,
    pub entry_type: String,
    pub currency: Currency,
    pub direction: Direction,
    pub layer: Layer,
    pub units: Units,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Position in an account's entry history, ordered by commit time then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryCursor {
    pub created_at: DateTime<Utc>,
    pub id: EntryId,
}

impl From<&Entry> for EntryCursor {
    fn from(entry: &Entry) -> Self {
        Self {
            created_at: entry.created_at,
            id: entry.id,
        }
    }
}

/// A committed posting. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub tx_template_id: TxTemplateId,
    pub template_code: String,
    pub journal_id: JournalId,
    pub correlation_id: String,
    pub external_id: Option<String>,
    pub effective: NaiveDate,
    pub description: Option<String>,
    pub metadata: Option<JsonValue>,
    /// The transaction this one voids, if any.
    pub reverses: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<Entry>,
}

impl Entity for Transaction {
    type Id = TransactionId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Transaction {
    /// Assign ids and positions to a resolved posting.
    pub fn assemble(
        template: &TxTemplate,
        header: ResolvedHeader,
        entries: Vec<ResolvedEntry>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let id = TransactionId::new();
        let journal_id = header.journal_id;
        let entries = entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                Ok(Entry {
                    id: EntryId::new(),
                    transaction_id: id,
                    journal_id,
                    account_id: e.account_id,
                    sequence: entry_sequence(i)?,
                    entry_type: e.entry_type,
                    currency: e.currency,
                    direction: e.direction,
                    layer: e.layer,
                    units: e.units,
                    description: e.description,
                    created_at: now,
                })
            })
            .collect::<LedgerResult<Vec<_>>>()?;

        Ok(Self {
            id,
            tx_template_id: template.id,
            template_code: template.code.clone(),
            journal_id,
            correlation_id: header.correlation_id.unwrap_or_else(|| id.to_string()),
            external_id: header.external_id,
            effective: header.effective,
            description: header.description,
            metadata: header.metadata,
            reverses: None,
            created_at: now,
            entries,
        })
    }

    /// Build the transaction that voids `self`.
    ///
    /// Every entry is mirrored on the opposite side with its type suffixed
    /// `_VOID`; journal, effective date and correlation id carry over.
    pub fn reversal(&self, now: DateTime<Utc>) -> Self {
        let id = TransactionId::new();
        let entries = self
            .entries
            .iter()
            .map(|e| Entry {
                id: EntryId::new(),
                transaction_id: id,
                journal_id: e.journal_id,
                account_id: e.account_id,
                sequence: e.sequence,
                entry_type: format!("{}{VOID_ENTRY_SUFFIX}", e.entry_type),
                currency: e.currency.clone(),
                direction: e.direction.opposite(),
                layer: e.layer,
                units: e.units,
                description: e.description.clone(),
                created_at: now,
            })
            .collect();

        Self {
            id,
            tx_template_id: self.tx_template_id,
            template_code: self.template_code.clone(),
            journal_id: self.journal_id,
            correlation_id: self.correlation_id.clone(),
            external_id: None,
            effective: self.effective,
            description: self.description.clone(),
            metadata: self.metadata.clone(),
            reverses: Some(self.id),
            created_at: now,
            entries,
        }
    }
}

/// 1-based position of the entry at `index`.
fn entry_sequence(index: usize) -> LedgerResult<u32> {
    u32::try_from(index)
        .ok()
        .and_then(|i| i.checked_add(1))
        .ok_or_else(|| LedgerError::InvalidTemplate(format!("entry index {index} exceeds the per-transaction limit")))
}
