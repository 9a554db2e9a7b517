//! Nested sub-record domain model (payments, workers, agents).
//!
//! # Invariants
//! - `locked` starts `false` and can only be set through `SubRecord::lock`.
//! - `submitted_at` is written once, on the first lock.

use crate::model::comment::{push_newest_first, Comment};
use crate::model::FieldMap;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Kind of nested collection under a parent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubKind {
    Payment,
    Worker,
    Agent,
}

impl SubKind {
    pub const ALL: [SubKind; 3] = [Self::Payment, Self::Worker, Self::Agent];

    pub fn collection(self) -> &'static str {
        match self {
            Self::Payment => "payments",
            Self::Worker => "workers",
            Self::Agent => "agents",
        }
    }

    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Payment => "PAY",
            Self::Worker => "WRK",
            Self::Agent => "AGT",
        }
    }

    pub fn from_collection(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.collection() == value)
    }
}

impl Display for SubKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

/// One entry of a parent record's nested collection.
#[derive(Debug, Clone, PartialEq)]
pub struct SubRecord {
    pub id: String,
    pub parent_id: String,
    pub kind: SubKind,
    pub fields: FieldMap,
    pub locked: bool,
    /// Unix epoch milliseconds of the first successful submission.
    pub submitted_at: Option<i64>,
    /// Newest-first.
    pub comments: Vec<Comment>,
    /// Insertion sequence; higher is newer.
    pub seq: u64,
    pub version: u64,
}

impl SubRecord {
    pub fn new(
        kind: SubKind,
        parent_id: impl Into<String>,
        id: impl Into<String>,
        seq: u64,
        fields: FieldMap,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            kind,
            fields,
            locked: false,
            submitted_at: None,
            comments: Vec::new(),
            seq,
            version: 0,
        }
    }

    /// Locks the entry. Repeated calls keep the first submission time.
    pub fn lock(&mut self, now: i64) {
        if !self.locked {
            self.locked = true;
            self.submitted_at = Some(now);
        }
    }

    pub fn add_comment(&mut self, comment: Comment) {
        push_newest_first(&mut self.comments, comment);
    }
}

/// Well-known sub-record field names.
pub mod fields {
    pub const NAME: &str = "name";
    pub const DESIGNATION: &str = "designation";
    pub const CATEGORY: &str = "category";
    pub const CONTACT_NO: &str = "contactNo";
    pub const BASE_SALARY: &str = "baseSalary";
    pub const WORKING_DAYS: &str = "workingDays";
    pub const ADVANCE: &str = "advance";
    pub const PAYMENT_MODE: &str = "paymentMode";
    pub const COMMISSION: &str = "commission";
    pub const PAID_AMOUNT: &str = "paidAmount";
    pub const REMINDER_DATE: &str = "reminderDate";
}
