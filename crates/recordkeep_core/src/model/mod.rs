//! Domain model for managed business records and their nested ledgers.
//!
//! # Responsibility
//! - Define canonical data structures used by lifecycle and ledger logic.
//! - Keep business fields schemaless (`FieldMap`) while lifecycle metadata
//!   stays strongly typed.
//!
//! # Invariants
//! - A record is identified by `(RecordType, id)`; ids are valid path segments.
//! - Reserved document keys are never accepted as business field names.
//! - `SubRecord::locked` is one-way: nothing in the model unlocks it.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod comment;
pub mod record;
pub mod sub_record;

/// Schemaless business fields, keyed by field name.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// Document keys owned by the lifecycle/ledger machinery.
pub const RESERVED_KEYS: &[&str] = &[
    "comments",
    "auditTrail",
    "originalId",
    "movedAt",
    "reason",
    "restoredAt",
    "revertReason",
    "locked",
    "submittedAt",
    "seq",
    "parentId",
];

/// Returns whether `field` is owned by lifecycle/ledger metadata.
pub fn is_reserved_key(field: &str) -> bool {
    RESERVED_KEYS.contains(&field)
}

/// Model-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Field name collides with a reserved document key.
    ReservedField(String),
    /// Identifier is empty or contains a path separator.
    InvalidId(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReservedField(field) => write!(f, "field name is reserved: `{field}`"),
            Self::InvalidId(id) => write!(f, "invalid identifier: `{id}`"),
        }
    }
}

impl Error for ModelError {}

/// Rejects business field maps that try to write reserved keys.
pub fn ensure_business_fields(fields: &FieldMap) -> Result<(), ModelError> {
    match fields.keys().find(|key| is_reserved_key(key)) {
        Some(key) => Err(ModelError::ReservedField(key.clone())),
        None => Ok(()),
    }
}

/// Validates that `id` can be used as one storage path segment.
pub fn ensure_valid_id(id: &str) -> Result<(), ModelError> {
    if id.trim().is_empty() || id.contains('/') || id != id.trim() {
        return Err(ModelError::InvalidId(id.to_string()));
    }
    Ok(())
}
