//! One parent's nested collection of a single sub-record kind.

use crate::calc::id_gen::next_id;
use crate::ledger::policy::LockPolicy;
use crate::ledger::validation::validate_for_submit;
use crate::ledger::LedgerError;
use crate::model::comment::Comment;
use crate::model::sub_record::{SubKind, SubRecord};
use crate::model::{is_reserved_key, FieldMap};
use serde_json::Value;
use std::collections::BTreeMap;

/// Result of an `edit` that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    /// Entry is locked and the field is not an override; nothing changed.
    Ignored,
}

/// Result of a `remove` that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// Entry is locked; nothing changed.
    RejectedLocked,
}

/// Id-keyed collection of sub-records under one parent.
#[derive(Debug, Clone, PartialEq)]
pub struct SubLedger {
    kind: SubKind,
    parent_id: String,
    entries: BTreeMap<String, SubRecord>,
}

impl SubLedger {
    pub fn new(kind: SubKind, parent_id: impl Into<String>) -> Self {
        Self {
            kind,
            parent_id: parent_id.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Builds a collection from stored entries; entries of another kind or
    /// parent are ignored.
    pub fn from_entries(
        kind: SubKind,
        parent_id: impl Into<String>,
        entries: impl IntoIterator<Item = SubRecord>,
    ) -> Self {
        let mut ledger = Self::new(kind, parent_id);
        for entry in entries {
            if entry.kind == kind && entry.parent_id == ledger.parent_id {
                ledger.entries.insert(entry.id.clone(), entry);
            }
        }
        ledger
    }

    pub fn kind(&self) -> SubKind {
        self.kind
    }

    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SubRecord> {
        self.entries.get(id)
    }

    /// Entries newest-first.
    pub fn ordered(&self) -> Vec<&SubRecord> {
        let mut entries: Vec<&SubRecord> = self.entries.values().collect();
        entries.sort_by(|left, right| right.seq.cmp(&left.seq).then(right.id.cmp(&left.id)));
        entries
    }

    /// Business fields of every entry, for aggregation.
    pub fn field_maps(&self) -> impl Iterator<Item = &FieldMap> + Clone {
        self.entries.values().map(|entry| &entry.fields)
    }

    /// Creates an unlocked entry with the next collection-scoped id.
    pub fn add(&mut self, fields: FieldMap) -> Result<&SubRecord, LedgerError> {
        if let Some(field) = fields.keys().find(|key| is_reserved_key(key)) {
            return Err(LedgerError::ReservedField(field.clone()));
        }

        let id = next_id(self.entries.keys().map(String::as_str), self.kind.id_prefix());
        let seq = self.entries.values().map(|entry| entry.seq).max().unwrap_or(0) + 1;
        let entry = SubRecord::new(self.kind, self.parent_id.clone(), id.clone(), seq, fields);
        Ok(self.entries.entry(id).or_insert(entry))
    }

    /// Writes one field, honoring the lock and the override table.
    ///
    /// A locked entry silently ignores writes to non-override fields.
    pub fn edit(
        &mut self,
        id: &str,
        field: &str,
        value: Value,
        policy: &LockPolicy,
    ) -> Result<EditOutcome, LedgerError> {
        let entry = self.entry_mut(id)?;
        if !policy.can_edit(entry, field) {
            return Ok(EditOutcome::Ignored);
        }
        if is_reserved_key(field) {
            return Err(LedgerError::ReservedField(field.to_string()));
        }
        entry.fields.insert(field.to_string(), value);
        Ok(EditOutcome::Applied)
    }

    /// Validates and locks an entry.
    ///
    /// Submitting an already locked entry succeeds without changing it.
    pub fn submit(&mut self, id: &str, now: i64) -> Result<(), LedgerError> {
        let entry = self.entry_mut(id)?;
        if entry.locked {
            return Ok(());
        }
        validate_for_submit(entry.kind, &entry.fields)?;
        entry.lock(now);
        Ok(())
    }

    /// Removes an unlocked entry; locked entries are kept.
    pub fn remove(&mut self, id: &str) -> Result<RemoveOutcome, LedgerError> {
        if self.entry(id)?.locked {
            return Ok(RemoveOutcome::RejectedLocked);
        }
        self.entries.remove(id);
        Ok(RemoveOutcome::Removed)
    }

    /// Prepends a comment; allowed regardless of lock state.
    pub fn comment(&mut self, id: &str, text: &str, now: i64) -> Result<&Comment, LedgerError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LedgerError::EmptyComment);
        }
        let entry = self.entry_mut(id)?;
        entry.add_comment(Comment::new(text, now));
        Ok(&entry.comments[0])
    }

    fn entry(&self, id: &str) -> Result<&SubRecord, LedgerError> {
        self.entries
            .get(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut SubRecord, LedgerError> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }
}
