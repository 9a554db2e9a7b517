//! Path-addressed document store contracts.
//!
//! # Responsibility
//! - Define the hierarchical key-value store consumed by repositories and
//!   services (`read`, `write`, `delete`, `subscribe`, `query_equal`).
//! - Carry optimistic-concurrency preconditions on every write.
//!
//! # Invariants
//! - Paths are `/`-joined non-empty segments; no segment contains `/`.
//! - `delete(path)` removes the path and every descendant.
//! - Every successful put increments the document `version` by one.
//! - Subscribers observe whole snapshots of the path they subscribed to.

use crate::db::DbError;
use crate::model::record::{Partition, RecordType};
use crate::model::sub_record::SubKind;
use crate::model::FieldMap;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod blob;
pub mod sqlite;
mod subscribers;

pub use sqlite::SqliteDocumentStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-level failure. Callers surface it and leave local state unchanged.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    InvalidPath(String),
    /// A write precondition did not hold.
    VersionConflict {
        path: String,
        expected: Expect,
        actual: Option<u64>,
    },
    /// Persisted document cannot be decoded.
    InvalidData(String),
    /// Backend cannot be reached or refused the operation.
    Unavailable(String),
    /// Connection is not migrated to the schema this binary expects.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidPath(path) => write!(f, "invalid store path: `{path}`"),
            Self::VersionConflict {
                path,
                expected,
                actual,
            } => match actual {
                Some(actual) => write!(
                    f,
                    "version conflict at `{path}`: expected {expected}, found version {actual}"
                ),
                None => write!(
                    f,
                    "version conflict at `{path}`: expected {expected}, found no document"
                ),
            },
            Self::InvalidData(message) => write!(f, "invalid stored document: {message}"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Hierarchical document address, e.g. `active/hospitals/HP3/payments/PAY1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath(String);

impl StorePath {
    /// Parses a `/`-joined path, rejecting empty segments.
    pub fn parse(value: &str) -> StoreResult<Self> {
        if value.is_empty() || value.split('/').any(|segment| !is_valid_segment(segment)) {
            return Err(StoreError::InvalidPath(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn child(&self, segment: &str) -> StoreResult<Self> {
        if !is_valid_segment(segment) {
            return Err(StoreError::InvalidPath(format!("{}/{segment}", self.0)));
        }
        Ok(Self(format!("{}/{segment}", self.0)))
    }

    /// Collection holding every record of `kind` in `partition`.
    pub fn collection(partition: Partition, kind: RecordType) -> Self {
        Self(format!("{}/{}", partition.segment(), kind.collection()))
    }

    pub fn record(partition: Partition, kind: RecordType, id: &str) -> StoreResult<Self> {
        Self::collection(partition, kind).child(id)
    }

    pub fn sub_collection(
        partition: Partition,
        kind: RecordType,
        id: &str,
        sub_kind: SubKind,
    ) -> StoreResult<Self> {
        Self::record(partition, kind, id)?.child(sub_kind.collection())
    }

    pub fn sub_record(
        partition: Partition,
        kind: RecordType,
        id: &str,
        sub_kind: SubKind,
        sub_id: &str,
    ) -> StoreResult<Self> {
        Self::sub_collection(partition, kind, id, sub_kind)?.child(sub_id)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Parent path, or an empty string for top-level paths.
    pub fn parent_str(&self) -> &str {
        self.0.rsplit_once('/').map_or("", |(parent, _)| parent)
    }

    pub fn last_segment(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, last)| last)
    }

    /// Whether `other` lies strictly below `self`.
    pub fn is_ancestor_of(&self, other: &StorePath) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(self.0.as_str())
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Whether a change at `changed` affects a snapshot taken at `self`.
    pub fn overlaps(&self, changed: &StorePath) -> bool {
        self == changed || self.is_ancestor_of(changed) || changed.is_ancestor_of(self)
    }

    /// Rewrites the leading `from` prefix of this path to `to`.
    pub fn rebase(&self, from: &StorePath, to: &StorePath) -> Option<StorePath> {
        if self == from {
            return Some(to.clone());
        }
        if from.is_ancestor_of(self) {
            return Some(Self(format!("{}{}", to.0, &self.0[from.0.len()..])));
        }
        None
    }
}

impl Display for StorePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('/') && segment.trim() == segment
}

/// Precondition attached to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Unconditional.
    Any,
    /// The path must not hold a document.
    Absent,
    /// The document must exist at exactly this version.
    Version(u64),
}

impl Expect {
    /// Checks this precondition against the version currently stored.
    pub fn holds(self, actual: Option<u64>) -> bool {
        match self {
            Self::Any => true,
            Self::Absent => actual.is_none(),
            Self::Version(expected) => actual == Some(expected),
        }
    }
}

impl Display for Expect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Absent => f.write_str("absent"),
            Self::Version(version) => write!(f, "version {version}"),
        }
    }
}

/// One mutation inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        path: StorePath,
        body: FieldMap,
        expect: Expect,
        /// Lowest version the document may hold after this write. Moves set
        /// it so a recreated path never reuses an older token.
        version_floor: u64,
    },
    /// Removes `path` and all descendants.
    Delete { path: StorePath, expect: Expect },
}

impl WriteOp {
    pub fn put(path: StorePath, body: FieldMap, expect: Expect) -> Self {
        Self::Put {
            path,
            body,
            expect,
            version_floor: 0,
        }
    }

    /// Raises the resulting version of a put to at least `floor`.
    /// No effect on deletes.
    pub fn with_version_floor(mut self, floor: u64) -> Self {
        if let Self::Put { version_floor, .. } = &mut self {
            *version_floor = floor;
        }
        self
    }

    pub fn delete(path: StorePath, expect: Expect) -> Self {
        Self::Delete { path, expect }
    }

    pub fn path(&self) -> &StorePath {
        match self {
            Self::Put { path, .. } | Self::Delete { path, .. } => path,
        }
    }
}

/// Stored document with its concurrency token.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: StorePath,
    pub body: FieldMap,
    pub version: u64,
    /// Unix epoch milliseconds of the last write.
    pub updated_at: i64,
}

/// Snapshot delivered to subscribers; `document` is `None` once deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: StorePath,
    pub document: Option<Document>,
}

pub type ChangeCallback = Box<dyn Fn(&Snapshot)>;

/// Handle returned by `subscribe`; dropping it also unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Hierarchical document store consumed by the record layer.
pub trait DocumentStore {
    /// Reads one document.
    fn read(&self, path: &StorePath) -> StoreResult<Option<Document>>;

    /// Lists direct children of `path`, ordered by path.
    fn list_children(&self, path: &StorePath) -> StoreResult<Vec<Document>>;

    /// Reads `path` and every descendant, ordered by path.
    fn read_subtree(&self, path: &StorePath) -> StoreResult<Vec<Document>>;

    /// Applies `ops` in order. Atomic only when `supports_atomic_batch()`.
    fn apply_batch(&self, ops: &[WriteOp]) -> StoreResult<()>;

    /// Whether `apply_batch` commits all-or-nothing.
    fn supports_atomic_batch(&self) -> bool;

    /// Registers `on_change` for snapshots of `path` after overlapping writes.
    fn subscribe(&self, path: &StorePath, on_change: ChangeCallback) -> StoreResult<Subscription>;

    fn write(&self, path: &StorePath, body: FieldMap, expect: Expect) -> StoreResult<()> {
        self.apply_batch(&[WriteOp::put(path.clone(), body, expect)])
    }

    fn delete(&self, path: &StorePath) -> StoreResult<()> {
        self.apply_batch(&[WriteOp::delete(path.clone(), Expect::Any)])
    }

    /// Children of `path` whose top-level `field` equals `value`.
    fn query_equal(
        &self,
        path: &StorePath,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Document>> {
        Ok(self
            .list_children(path)?
            .into_iter()
            .filter(|document| document.body.get(field) == Some(value))
            .collect())
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for &S {
    fn read(&self, path: &StorePath) -> StoreResult<Option<Document>> {
        (**self).read(path)
    }

    fn list_children(&self, path: &StorePath) -> StoreResult<Vec<Document>> {
        (**self).list_children(path)
    }

    fn read_subtree(&self, path: &StorePath) -> StoreResult<Vec<Document>> {
        (**self).read_subtree(path)
    }

    fn apply_batch(&self, ops: &[WriteOp]) -> StoreResult<()> {
        (**self).apply_batch(ops)
    }

    fn supports_atomic_batch(&self) -> bool {
        (**self).supports_atomic_batch()
    }

    fn subscribe(&self, path: &StorePath, on_change: ChangeCallback) -> StoreResult<Subscription> {
        (**self).subscribe(path, on_change)
    }

    fn query_equal(
        &self,
        path: &StorePath,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Document>> {
        (**self).query_equal(path, field, value)
    }
}
