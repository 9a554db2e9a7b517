//! Parent record domain model.
//!
//! # Responsibility
//! - Define the managed record (hospital/client/agent) and its partitions.
//! - Carry the append-only audit trail of archive/restore moves.
//!
//! # Invariants
//! - `id` is preserved verbatim across partition moves.
//! - `audit_trail` only grows; lifecycle helpers never drop entries.
//! - An archived record always has a `LifecycleStamp::Archived` stamp.

use crate::model::comment::{push_newest_first, Comment};
use crate::model::FieldMap;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Business record categories managed by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Hospital,
    Client,
    Agent,
}

impl RecordType {
    pub const ALL: [RecordType; 3] = [Self::Hospital, Self::Client, Self::Agent];

    /// Storage collection segment for this type.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Hospital => "hospitals",
            Self::Client => "clients",
            Self::Agent => "agents",
        }
    }

    /// Prefix used for sequential record identifiers.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Hospital => "HP",
            Self::Client => "CL",
            Self::Agent => "AW",
        }
    }

    pub fn from_collection(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.collection() == value)
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

/// Storage partition a record currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Active,
    Archived,
}

impl Partition {
    pub fn segment(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    /// The partition a move out of `self` lands in.
    pub fn opposite(self) -> Self {
        match self {
            Self::Active => Self::Archived,
            Self::Archived => Self::Active,
        }
    }
}

impl Display for Partition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.segment())
    }
}

/// Kind of partition move recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Archived,
    Restored,
}

/// One archive or restore event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub action: AuditAction,
    /// Unix epoch milliseconds.
    pub at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Metadata of the most recent partition move.
///
/// Archived copies carry `movedAt`/`reason`; restored copies carry
/// `restoredAt`/`revertReason` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleStamp {
    Archived {
        moved_at: i64,
        reason: Option<String>,
    },
    Restored {
        restored_at: i64,
        revert_reason: String,
    },
}

/// Canonical managed record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub kind: RecordType,
    pub partition: Partition,
    /// Business fields (name, contact number, address, ...).
    pub fields: FieldMap,
    /// Newest-first.
    pub comments: Vec<Comment>,
    /// Oldest-first, append-only.
    pub audit_trail: Vec<AuditEvent>,
    pub stamp: Option<LifecycleStamp>,
    /// Store version observed when this record was read; `0` if never stored.
    pub version: u64,
}

impl Record {
    /// Creates a never-moved active record.
    pub fn new(kind: RecordType, id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            id: id.into(),
            kind,
            partition: Partition::Active,
            fields,
            comments: Vec::new(),
            audit_trail: Vec::new(),
            stamp: None,
            version: 0,
        }
    }

    pub fn type_prefix(&self) -> &'static str {
        self.kind.id_prefix()
    }

    /// The id the archived copy was filed under; equal to `id` by construction.
    pub fn original_id(&self) -> Option<&str> {
        match self.partition {
            Partition::Archived => Some(self.id.as_str()),
            Partition::Active => None,
        }
    }

    pub fn moved_at(&self) -> Option<i64> {
        match &self.stamp {
            Some(LifecycleStamp::Archived { moved_at, .. }) => Some(*moved_at),
            _ => None,
        }
    }

    pub fn archive_reason(&self) -> Option<&str> {
        match &self.stamp {
            Some(LifecycleStamp::Archived { reason, .. }) => reason.as_deref(),
            _ => None,
        }
    }

    pub fn restored_at(&self) -> Option<i64> {
        match &self.stamp {
            Some(LifecycleStamp::Restored { restored_at, .. }) => Some(*restored_at),
            _ => None,
        }
    }

    pub fn revert_reason(&self) -> Option<&str> {
        match &self.stamp {
            Some(LifecycleStamp::Restored { revert_reason, .. }) => Some(revert_reason.as_str()),
            _ => None,
        }
    }

    /// Timestamp of the latest audit event, if the record was ever moved.
    pub fn last_moved_at(&self) -> Option<i64> {
        self.audit_trail.iter().map(|event| event.at).max()
    }

    pub fn add_comment(&mut self, comment: Comment) {
        push_newest_first(&mut self.comments, comment);
    }

    /// Returns the archived counterpart of this record.
    ///
    /// Business fields and comments are carried verbatim; the audit trail
    /// gains one `Archived` event.
    pub fn into_archived(mut self, moved_at: i64, reason: Option<String>) -> Self {
        let reason = reason
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self.audit_trail.push(AuditEvent {
            action: AuditAction::Archived,
            at: moved_at,
            reason: reason.clone(),
        });
        self.partition = Partition::Archived;
        self.stamp = Some(LifecycleStamp::Archived { moved_at, reason });
        self
    }

    /// Returns the restored counterpart of this record.
    ///
    /// The archive stamp is replaced by a restore stamp; the audit trail keeps
    /// every earlier event and gains one `Restored` event.
    pub fn into_restored(mut self, restored_at: i64, revert_reason: String) -> Self {
        self.audit_trail.push(AuditEvent {
            action: AuditAction::Restored,
            at: restored_at,
            reason: Some(revert_reason.clone()),
        });
        self.partition = Partition::Active;
        self.stamp = Some(LifecycleStamp::Restored {
            restored_at,
            revert_reason,
        });
        self
    }
}
