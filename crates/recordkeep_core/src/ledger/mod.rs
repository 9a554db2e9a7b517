//! Nested sub-record ledger: add/edit/lock/remove rules for one collection.
//!
//! # Responsibility
//! - Enforce the one-way lock and the override allow-list in one place.
//! - Validate kind-specific required fields on submission.
//!
//! # Invariants
//! - A collection is keyed by sub-record id; order derives from `seq`.
//! - Locked entries can be commented on and can have override fields
//!   edited; nothing else about them changes.
//! - Failed operations leave the collection unchanged.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod collection;
pub mod policy;
pub mod validation;

pub use collection::{EditOutcome, RemoveOutcome, SubLedger};
pub use policy::LockPolicy;
pub use validation::validate_for_submit;

/// Field -> message map returned when a submission is incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &str, message: impl Into<String>) {
        self.0.insert(field.to_string(), message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn message(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(field, message)| (field.as_str(), message.as_str()))
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "validation failed: {joined}")
    }
}

impl Error for ValidationErrors {}

/// Errors from ledger operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No entry with this id in the collection.
    NotFound(String),
    /// Submission is missing required fields.
    Validation(ValidationErrors),
    /// Field name is owned by ledger metadata.
    ReservedField(String),
    /// Comment text is blank after trim.
    EmptyComment,
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "sub-record not found: {id}"),
            Self::Validation(errors) => write!(f, "{errors}"),
            Self::ReservedField(field) => write!(f, "field name is reserved: `{field}`"),
            Self::EmptyComment => write!(f, "comment text must not be blank"),
        }
    }
}

impl Error for LedgerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for LedgerError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}
