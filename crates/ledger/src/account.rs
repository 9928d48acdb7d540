use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tally_core::{AccountId, DomainError, Entity};

use crate::error::LedgerResult;
use crate::primitives::NormalBalance;

/// Free-form key/value metadata.
pub type Metadata = BTreeMap<String, JsonValue>;

/// A ledger participant.
///
/// `id`, `code` and `normal_balance` are fixed at creation; the descriptive
/// fields and metadata may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub code: String,
    pub name: String,
    pub normal_balance: NormalBalance,
    pub description: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub id: AccountId,
    pub code: String,
    pub name: String,
    pub normal_balance: NormalBalance,
    pub description: Option<String>,
    pub metadata: Metadata,
}

impl NewAccount {
    pub fn new(code: impl Into<String>, name: impl Into<String>, normal_balance: NormalBalance) -> Self {
        Self {
            id: AccountId::new(),
            code: code.into(),
            name: name.into(),
            normal_balance,
            description: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_id(mut self, id: AccountId) -> Self {
        self.id = id;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Replaces the whole metadata map.
    pub metadata: Option<Metadata>,
}

impl Account {
    pub fn create(new: NewAccount, now: DateTime<Utc>) -> LedgerResult<Self> {
        let code = new.code.trim().to_string();
        if code.is_empty() {
            return Err(DomainError::validation("account code cannot be empty").into());
        }
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("account name cannot be empty").into());
        }
        Ok(Self {
            id: new.id,
            code,
            name,
            normal_balance: new.normal_balance,
            description: new.description,
            metadata: new.metadata,
            created_at: now,
            modified_at: now,
        })
    }

    /// Apply an update, returning the names of the fields that changed.
    pub fn apply_update(&mut self, update: AccountUpdate, now: DateTime<Utc>) -> LedgerResult<Vec<String>> {
        let mut changed = Vec::new();
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(DomainError::validation("account name cannot be empty").into());
            }
            if name != self.name {
                self.name = name;
                changed.push("name".to_string());
            }
        }
        if let Some(description) = update.description {
            if self.description.as_deref() != Some(description.as_str()) {
                self.description = Some(description);
                changed.push("description".to_string());
            }
        }
        if let Some(metadata) = update.metadata {
            if metadata != self.metadata {
                self.metadata = metadata;
                changed.push("metadata".to_string());
            }
        }
        if !changed.is_empty() {
            self.modified_at = now;
        }
        Ok(changed)
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_trims_and_validates() {
        let a = Account::create(NewAccount::new(" 1000 ", "Cash", NormalBalance::Debit), Utc::now()).unwrap();
        assert_eq!(a.code, "1000");
        assert!(Account::create(NewAccount::new("", "Cash", NormalBalance::Debit), Utc::now()).is_err());
    }

    #[test]
    fn update_never_touches_identity() {
        let now = Utc::now();
        let mut a = Account::create(
            NewAccount::new("2000", "Checking", NormalBalance::Credit).with_metadata("tier", "gold"),
            now,
        )
        .unwrap();
        let id = a.id;

        let mut metadata = Metadata::new();
        metadata.insert("tier".into(), "platinum".into());
        let changed = a
            .apply_update(
                AccountUpdate {
                    name: Some("Checking (primary)".into()),
                    description: None,
                    metadata: Some(metadata),
                },
                now,
            )
            .unwrap();

        assert_eq!(changed, vec!["name".to_string(), "metadata".to_string()]);
        assert_eq!(a.id, id);
        assert_eq!(a.code, "2000");
        assert_eq!(a.normal_balance, NormalBalance::Credit);
    }
}
