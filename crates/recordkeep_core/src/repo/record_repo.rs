//! Record/sub-record persistence over the document store.
//!
//! # Responsibility
//! - Encode records and sub-records as documents at their partition paths.
//! - Decode stored documents back, rejecting invalid persisted state.
//!
//! # Invariants
//! - Business fields live at the top level of a document body next to the
//!   reserved metadata keys.
//! - An archived document always carries `originalId` and `movedAt`.
//! - Decoded records carry the document version as their concurrency token.

use crate::calc::id_gen::compare_ids_natural;
use crate::ledger::SubLedger;
use crate::model::comment::Comment;
use crate::model::record::{AuditEvent, LifecycleStamp, Partition, Record, RecordType};
use crate::model::sub_record::{SubKind, SubRecord};
use crate::model::FieldMap;
use crate::store::{Document, DocumentStore, Expect, StoreError, StorePath, WriteOp};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for record persistence and decoding.
#[derive(Debug)]
pub enum RepoError {
    Store(StoreError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Record repository over any document store.
pub struct RecordRepository<S: DocumentStore> {
    store: S,
}

impl<S: DocumentStore> RecordRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get_record(
        &self,
        kind: RecordType,
        partition: Partition,
        id: &str,
    ) -> RepoResult<Option<Record>> {
        let path = StorePath::record(partition, kind, id)?;
        match self.store.read(&path)? {
            Some(document) => Ok(Some(record_from_document(&document, kind)?)),
            None => Ok(None),
        }
    }

    /// Lists records of one partition ordered by natural id.
    pub fn list_records(&self, kind: RecordType, partition: Partition) -> RepoResult<Vec<Record>> {
        let mut records = self
            .store
            .list_children(&StorePath::collection(partition, kind))?
            .iter()
            .map(|document| record_from_document(document, kind))
            .collect::<RepoResult<Vec<_>>>()?;
        records.sort_by(|left, right| compare_ids_natural(&left.id, &right.id));
        Ok(records)
    }

    pub fn list_ids(&self, kind: RecordType, partition: Partition) -> RepoResult<Vec<String>> {
        Ok(self
            .store
            .list_children(&StorePath::collection(partition, kind))?
            .into_iter()
            .map(|document| document.path.last_segment().to_string())
            .collect())
    }

    pub fn list_sub_records(
        &self,
        kind: RecordType,
        partition: Partition,
        record_id: &str,
        sub_kind: SubKind,
    ) -> RepoResult<Vec<SubRecord>> {
        let path = StorePath::sub_collection(partition, kind, record_id, sub_kind)?;
        self.store
            .list_children(&path)?
            .iter()
            .map(|document| sub_record_from_document(document, sub_kind))
            .collect()
    }

    pub fn load_sub_ledger(
        &self,
        kind: RecordType,
        partition: Partition,
        record_id: &str,
        sub_kind: SubKind,
    ) -> RepoResult<SubLedger> {
        let entries = self.list_sub_records(kind, partition, record_id, sub_kind)?;
        Ok(SubLedger::from_entries(sub_kind, record_id, entries))
    }
}

/// Put op writing `record` at its own partition path.
pub fn record_put_op(record: &Record, expect: Expect) -> RepoResult<WriteOp> {
    let path = StorePath::record(record.partition, record.kind, &record.id)?;
    Ok(WriteOp::put(path, record_to_body(record)?, expect))
}

/// Put op writing `entry` under its parent in `partition`.
pub fn sub_record_put_op(
    partition: Partition,
    kind: RecordType,
    entry: &SubRecord,
    expect: Expect,
) -> RepoResult<WriteOp> {
    let path = StorePath::sub_record(partition, kind, &entry.parent_id, entry.kind, &entry.id)?;
    Ok(WriteOp::put(path, sub_record_to_body(entry)?, expect))
}

/// Precondition matching the version a value was read at.
pub fn expect_for_version(version: u64) -> Expect {
    if version == 0 {
        Expect::Absent
    } else {
        Expect::Version(version)
    }
}

pub fn record_to_body(record: &Record) -> RepoResult<FieldMap> {
    let mut body = record.fields.clone();
    body.insert("comments".to_string(), to_json(&record.comments)?);
    body.insert("auditTrail".to_string(), to_json(&record.audit_trail)?);
    match &record.stamp {
        Some(LifecycleStamp::Archived { moved_at, reason }) => {
            body.insert("originalId".to_string(), Value::from(record.id.as_str()));
            body.insert("movedAt".to_string(), Value::from(*moved_at));
            body.insert("reason".to_string(), to_json(reason)?);
        }
        Some(LifecycleStamp::Restored {
            restored_at,
            revert_reason,
        }) => {
            body.insert("restoredAt".to_string(), Value::from(*restored_at));
            body.insert("revertReason".to_string(), Value::from(revert_reason.as_str()));
        }
        None => {}
    }
    Ok(body)
}

pub fn record_from_document(document: &Document, kind: RecordType) -> RepoResult<Record> {
    let path = document.path.as_str();
    let partition = partition_of(&document.path)?;
    let id = document.path.last_segment().to_string();

    let mut fields = document.body.clone();
    let comments: Vec<Comment> = take_reserved(&mut fields, "comments", path)?.unwrap_or_default();
    let audit_trail: Vec<AuditEvent> =
        take_reserved(&mut fields, "auditTrail", path)?.unwrap_or_default();
    let original_id: Option<String> = take_reserved(&mut fields, "originalId", path)?;
    let moved_at: Option<i64> = take_reserved(&mut fields, "movedAt", path)?;
    let reason: Option<String> = take_reserved(&mut fields, "reason", path)?;
    let restored_at: Option<i64> = take_reserved(&mut fields, "restoredAt", path)?;
    let revert_reason: Option<String> = take_reserved(&mut fields, "revertReason", path)?;

    let stamp = match partition {
        Partition::Archived => {
            let moved_at = moved_at.ok_or_else(|| {
                RepoError::InvalidData(format!("archived record `{path}` has no movedAt"))
            })?;
            if original_id.as_deref() != Some(id.as_str()) {
                return Err(RepoError::InvalidData(format!(
                    "archived record `{path}` has mismatched originalId"
                )));
            }
            Some(LifecycleStamp::Archived { moved_at, reason })
        }
        Partition::Active => match (restored_at, revert_reason) {
            (Some(restored_at), Some(revert_reason)) => Some(LifecycleStamp::Restored {
                restored_at,
                revert_reason,
            }),
            _ => None,
        },
    };

    Ok(Record {
        id,
        kind,
        partition,
        fields,
        comments,
        audit_trail,
        stamp,
        version: document.version,
    })
}

pub fn sub_record_to_body(entry: &SubRecord) -> RepoResult<FieldMap> {
    let mut body = entry.fields.clone();
    body.insert("parentId".to_string(), Value::from(entry.parent_id.as_str()));
    body.insert("locked".to_string(), Value::Bool(entry.locked));
    body.insert("submittedAt".to_string(), to_json(&entry.submitted_at)?);
    body.insert("comments".to_string(), to_json(&entry.comments)?);
    body.insert("seq".to_string(), Value::from(entry.seq));
    Ok(body)
}

pub fn sub_record_from_document(document: &Document, kind: SubKind) -> RepoResult<SubRecord> {
    let path = document.path.as_str();
    let mut fields = document.body.clone();
    let parent_id: String = take_reserved(&mut fields, "parentId", path)?.ok_or_else(|| {
        RepoError::InvalidData(format!("sub-record `{path}` has no parentId"))
    })?;
    let locked: bool = take_reserved(&mut fields, "locked", path)?.unwrap_or(false);
    let submitted_at: Option<i64> = take_reserved(&mut fields, "submittedAt", path)?;
    let comments: Vec<Comment> = take_reserved(&mut fields, "comments", path)?.unwrap_or_default();
    let seq: u64 = take_reserved(&mut fields, "seq", path)?.unwrap_or(0);

    Ok(SubRecord {
        id: document.path.last_segment().to_string(),
        parent_id,
        kind,
        fields,
        locked,
        submitted_at,
        comments,
        seq,
        version: document.version,
    })
}

fn partition_of(path: &StorePath) -> RepoResult<Partition> {
    match path.as_str().split('/').next() {
        Some("active") => Ok(Partition::Active),
        Some("archived") => Ok(Partition::Archived),
        _ => Err(RepoError::InvalidData(format!(
            "path `{path}` is outside the record partitions"
        ))),
    }
}

fn take_reserved<T: DeserializeOwned>(
    fields: &mut FieldMap,
    key: &str,
    path: &str,
) -> RepoResult<Option<T>> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some).map_err(|err| {
            RepoError::InvalidData(format!("invalid `{key}` at `{path}`: {err}"))
        }),
    }
}

fn to_json<T: Serialize>(value: &T) -> RepoResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode value: {err}")))
}
