//! Nested ledger use-case service.
//!
//! # Responsibility
//! - Load one parent's sub-record collection, apply a single ledger
//!   operation and persist the touched entry.
//! - Enforce the lock policy the service was built with.
//!
//! # Invariants
//! - Ledger mutations only target records in the active partition.
//! - Each persisted write is conditioned on the entry version that was
//!   loaded; a failed write leaves the stored collection unchanged.

use crate::clock::{Clock, SystemClock};
use crate::ledger::{EditOutcome, LedgerError, LockPolicy, RemoveOutcome, SubLedger};
use crate::model::record::{Partition, RecordType};
use crate::model::sub_record::{SubKind, SubRecord};
use crate::model::FieldMap;
use crate::repo::record_repo::{
    expect_for_version, sub_record_from_document, sub_record_put_op, RecordRepository, RepoError,
};
use crate::store::{DocumentStore, Expect, StoreError, StorePath, WriteOp};
use log::{debug, info};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type LedgerServiceResult<T> = Result<T, LedgerServiceError>;

/// Service error for ledger use-cases.
#[derive(Debug)]
pub enum LedgerServiceError {
    /// Parent record is missing from the active partition.
    ParentNotFound { kind: RecordType, id: String },
    Ledger(LedgerError),
    Store(StoreError),
    Repo(RepoError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for LedgerServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParentNotFound { kind, id } => write!(f, "active record not found: {kind}/{id}"),
            Self::Ledger(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent ledger state: {details}"),
        }
    }
}

impl Error for LedgerServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Ledger(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LedgerError> for LedgerServiceError {
    fn from(value: LedgerError) -> Self {
        Self::Ledger(value)
    }
}

impl From<StoreError> for LedgerServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RepoError> for LedgerServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Store(err) => Self::Store(err),
            other => Self::Repo(other),
        }
    }
}

/// Addresses one nested collection: `(record type, record id, sub kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerRef<'a> {
    pub kind: RecordType,
    pub record_id: &'a str,
    pub sub_kind: SubKind,
}

impl<'a> LedgerRef<'a> {
    pub fn new(kind: RecordType, record_id: &'a str, sub_kind: SubKind) -> Self {
        Self {
            kind,
            record_id,
            sub_kind,
        }
    }
}

/// Ledger service over a document store.
pub struct LedgerService<S: DocumentStore, C: Clock = SystemClock> {
    repo: RecordRepository<S>,
    clock: C,
    policy: LockPolicy,
}

impl<S: DocumentStore> LedgerService<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: DocumentStore, C: Clock> LedgerService<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            repo: RecordRepository::new(store),
            clock,
            policy: LockPolicy::default(),
        }
    }

    /// Replaces the post-lock override table.
    pub fn with_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// Entries newest-first.
    pub fn list(&self, target: LedgerRef<'_>) -> LedgerServiceResult<Vec<SubRecord>> {
        let ledger = self.load(target)?;
        Ok(ledger.ordered().into_iter().cloned().collect())
    }

    pub fn get(&self, target: LedgerRef<'_>, id: &str) -> LedgerServiceResult<SubRecord> {
        let ledger = self.load(target)?;
        ledger
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()).into())
    }

    /// Creates an unlocked entry with the next collection-scoped id.
    pub fn add(&self, target: LedgerRef<'_>, fields: FieldMap) -> LedgerServiceResult<SubRecord> {
        let mut ledger = self.load(target)?;
        let entry = ledger.add(fields)?.clone();
        let stored = self.persist(target, &entry)?;
        info!(
            "event=ledger_add module=ledger status=ok kind={} record_id={} sub_kind={} id={}",
            target.kind, target.record_id, target.sub_kind, stored.id
        );
        Ok(stored)
    }

    /// Writes one field. Locked entries ignore non-override fields.
    pub fn edit(
        &self,
        target: LedgerRef<'_>,
        id: &str,
        field: &str,
        value: Value,
    ) -> LedgerServiceResult<EditOutcome> {
        let mut ledger = self.load(target)?;
        let outcome = ledger.edit(id, field, value, &self.policy)?;
        match outcome {
            EditOutcome::Applied => {
                let entry = ledger
                    .get(id)
                    .ok_or(LedgerServiceError::InconsistentState("edited entry vanished"))?;
                self.persist(target, entry)?;
            }
            EditOutcome::Ignored => debug!(
                "event=ledger_edit module=ledger status=ignored kind={} record_id={} id={id} field={field}",
                target.kind, target.record_id
            ),
        }
        Ok(outcome)
    }

    /// Validates required fields and locks the entry.
    pub fn submit(&self, target: LedgerRef<'_>, id: &str) -> LedgerServiceResult<SubRecord> {
        let mut ledger = self.load(target)?;
        let was_locked = ledger.get(id).is_some_and(|entry| entry.locked);
        ledger.submit(id, self.clock.now_ms())?;

        let entry = ledger
            .get(id)
            .ok_or(LedgerServiceError::InconsistentState("submitted entry vanished"))?;
        if was_locked {
            return Ok(entry.clone());
        }
        let stored = self.persist(target, entry)?;
        info!(
            "event=ledger_submit module=ledger status=ok kind={} record_id={} sub_kind={} id={id}",
            target.kind, target.record_id, target.sub_kind
        );
        Ok(stored)
    }

    /// Deletes an unlocked entry; locked entries are kept.
    pub fn remove(&self, target: LedgerRef<'_>, id: &str) -> LedgerServiceResult<RemoveOutcome> {
        let mut ledger = self.load(target)?;
        let version = ledger.get(id).map_or(0, |entry| entry.version);
        let outcome = ledger.remove(id)?;
        if outcome == RemoveOutcome::Removed {
            let path = self.entry_path(target, id)?;
            self.repo
                .store()
                .apply_batch(&[WriteOp::delete(path, Expect::Version(version))])?;
            info!(
                "event=ledger_remove module=ledger status=ok kind={} record_id={} id={id}",
                target.kind, target.record_id
            );
        }
        Ok(outcome)
    }

    /// Prepends a comment; allowed on locked entries.
    pub fn comment(
        &self,
        target: LedgerRef<'_>,
        id: &str,
        text: &str,
    ) -> LedgerServiceResult<SubRecord> {
        let mut ledger = self.load(target)?;
        ledger.comment(id, text, self.clock.now_ms())?;
        let entry = ledger
            .get(id)
            .ok_or(LedgerServiceError::InconsistentState("commented entry vanished"))?;
        self.persist(target, entry)
    }

    /// Loads the collection once the parent is confirmed active.
    pub fn load(&self, target: LedgerRef<'_>) -> LedgerServiceResult<SubLedger> {
        if self
            .repo
            .get_record(target.kind, Partition::Active, target.record_id)?
            .is_none()
        {
            return Err(LedgerServiceError::ParentNotFound {
                kind: target.kind,
                id: target.record_id.to_string(),
            });
        }
        Ok(self.repo.load_sub_ledger(
            target.kind,
            Partition::Active,
            target.record_id,
            target.sub_kind,
        )?)
    }

    fn entry_path(&self, target: LedgerRef<'_>, id: &str) -> LedgerServiceResult<StorePath> {
        Ok(StorePath::sub_record(
            Partition::Active,
            target.kind,
            target.record_id,
            target.sub_kind,
            id,
        )?)
    }

    fn persist(&self, target: LedgerRef<'_>, entry: &SubRecord) -> LedgerServiceResult<SubRecord> {
        let op = sub_record_put_op(
            Partition::Active,
            target.kind,
            entry,
            expect_for_version(entry.version),
        )?;
        let path = op.path().clone();
        self.repo.store().apply_batch(&[op])?;

        let document = self
            .repo
            .store()
            .read(&path)?
            .ok_or(LedgerServiceError::InconsistentState(
                "entry not found in read-back",
            ))?;
        Ok(sub_record_from_document(&document, target.sub_kind)?)
    }
}
