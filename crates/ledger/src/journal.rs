use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{DomainError, Entity, JournalId};

use crate::error::LedgerResult;

/// A named ledger partition transactions post into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub id: JournalId,
    pub name: String,
    /// Unique when present.
    pub code: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournal {
    pub id: JournalId,
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
}

impl NewJournal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: JournalId::new(),
            name: name.into(),
            code: None,
            description: None,
        }
    }

    pub fn with_id(mut self, id: JournalId) -> Self {
        self.id = id;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Descriptive fields that may change after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl Journal {
    pub fn create(new: NewJournal, now: DateTime<Utc>) -> LedgerResult<Self> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("journal name cannot be empty").into());
        }
        let code = match new.code.map(|c| c.trim().to_string()) {
            Some(c) if c.is_empty() => return Err(DomainError::validation("journal code cannot be blank").into()),
            other => other,
        };
        Ok(Self {
            id: new.id,
            name,
            code,
            description: new.description,
            created_at: now,
            modified_at: now,
        })
    }

    /// Apply an update, returning the names of the fields that changed.
    pub fn apply_update(&mut self, update: JournalUpdate, now: DateTime<Utc>) -> LedgerResult<Vec<String>> {
        let mut changed = Vec::new();
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(DomainError::validation("journal name cannot be empty").into());
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
        if !changed.is_empty() {
            self.modified_at = now;
        }
        Ok(changed)
    }
}

impl Entity for Journal {
    type Id = JournalId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_name_is_rejected() {
        assert!(Journal::create(NewJournal::new("  "), Utc::now()).is_err());
        assert!(Journal::create(NewJournal::new("General").with_code(" "), Utc::now()).is_err());
    }

    #[test]
    fn update_reports_changed_fields_only() {
        let now = Utc::now();
        let mut j = Journal::create(NewJournal::new("General"), now).unwrap();
        let changed = j
            .apply_update(
                JournalUpdate {
                    name: Some("General".into()),
                    description: Some("main book".into()),
                },
                now,
            )
            .unwrap();
        assert_eq!(changed, vec!["description".to_string()]);
        assert_eq!(j.description.as_deref(), Some("main book"));
    }
}
