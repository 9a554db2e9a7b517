//! Record lifecycle: moves between the active and archived partitions.
//!
//! # Responsibility
//! - Archive, restore and permanently delete records with audit metadata.
//! - Carry the record's whole nested subtree along with each move.
//! - Detect and resolve records left in both partitions by an interrupted
//!   move.
//!
//! # Invariants
//! - A move is "write destination, then delete source". On stores with
//!   atomic batches both steps commit together; otherwise a failure between
//!   them is reported as `LifecycleError::PartialMove`, never hidden.
//! - A move never overwrites an existing record at the destination.
//! - The source delete is conditioned on the version read at the start of
//!   the move. Moved documents get versions above their source versions.
//! - Reconciliation never drops a nested entry that only the stale copy
//!   holds.
//! - Audit trails are appended to, never truncated.

use crate::clock::{Clock, SystemClock};
use crate::model::record::{Partition, Record, RecordType};
use crate::repo::record_repo::{record_put_op, RecordRepository, RepoError};
use crate::store::{DocumentStore, Expect, StoreError, StorePath, WriteOp};
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors from lifecycle moves.
#[derive(Debug)]
pub enum LifecycleError {
    NotFound {
        kind: RecordType,
        partition: Partition,
        id: String,
    },
    /// Restore was attempted without a non-blank reason.
    ReasonRequired,
    /// The move destination already holds the record, usually after an
    /// interrupted move. Run `reconcile` first.
    AlreadyInPartition {
        kind: RecordType,
        partition: Partition,
        id: String,
    },
    /// Nothing was changed.
    Store(StoreError),
    Repo(RepoError),
    /// Some steps of a non-atomic move were applied before `source` failed;
    /// the record may now exist in both partitions.
    PartialMove {
        kind: RecordType,
        id: String,
        completed_steps: usize,
        total_steps: usize,
        source: StoreError,
    },
    /// Write succeeded but read-back did not find the record.
    InconsistentState(&'static str),
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound {
                kind,
                partition,
                id,
            } => write!(f, "{partition} record not found: {kind}/{id}"),
            Self::ReasonRequired => write!(f, "a non-empty reason is required to restore"),
            Self::AlreadyInPartition {
                kind,
                partition,
                id,
            } => write!(
                f,
                "{kind}/{id} already exists in the {partition} partition; reconcile first"
            ),
            Self::Store(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::PartialMove {
                kind,
                id,
                completed_steps,
                total_steps,
                source,
            } => write!(
                f,
                "move of {kind}/{id} stopped after {completed_steps} of {total_steps} steps: {source}"
            ),
            Self::InconsistentState(details) => write!(f, "inconsistent lifecycle state: {details}"),
        }
    }
}

impl Error for LifecycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::PartialMove { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RepoError> for LifecycleError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Store(err) => Self::Store(err),
            other => Self::Repo(other),
        }
    }
}

/// One duplicate resolved by [`LifecycleManager::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDuplicate {
    pub id: String,
    /// Partition whose copy was kept.
    pub kept: Partition,
    /// Nested entries copied from the stale copy because the kept copy
    /// lacked them.
    pub recovered_entries: usize,
}

/// Outcome of a reconciliation sweep over one record type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ids present in both partitions when the sweep started.
    pub duplicates_found: usize,
    pub resolved: Vec<ResolvedDuplicate>,
}

/// Lifecycle manager over a document store.
pub struct LifecycleManager<S: DocumentStore, C: Clock = SystemClock> {
    repo: RecordRepository<S>,
    clock: C,
}

impl<S: DocumentStore> LifecycleManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: DocumentStore, C: Clock> LifecycleManager<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            repo: RecordRepository::new(store),
            clock,
        }
    }

    /// Moves an active record to the archived partition.
    ///
    /// The archived copy keeps its id, fields and comments, and gains
    /// `movedAt`, `reason` and one audit event.
    pub fn archive(
        &self,
        kind: RecordType,
        id: &str,
        reason: Option<&str>,
    ) -> LifecycleResult<Record> {
        let record = self.require(kind, Partition::Active, id)?;
        let archived = record
            .clone()
            .into_archived(self.clock.now_ms(), reason.map(str::to_string));

        self.relocate(&record, &archived, "record_archive")?;
        self.repo
            .get_record(kind, Partition::Archived, id)?
            .ok_or(LifecycleError::InconsistentState(
                "archived record not found in read-back",
            ))
    }

    /// Moves an archived record back to the active partition.
    ///
    /// `reason` must be non-blank. The restored copy drops the archive stamp
    /// and gains `restoredAt`, `revertReason` and one audit event.
    pub fn restore(&self, kind: RecordType, id: &str, reason: &str) -> LifecycleResult<Record> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LifecycleError::ReasonRequired);
        }

        let archived = self.require(kind, Partition::Archived, id)?;
        let restored = archived
            .clone()
            .into_restored(self.clock.now_ms(), reason.to_string());

        self.relocate(&archived, &restored, "record_restore")?;
        self.repo
            .get_record(kind, Partition::Active, id)?
            .ok_or(LifecycleError::InconsistentState(
                "restored record not found in read-back",
            ))
    }

    /// Irreversibly removes an archived record and its nested entries.
    pub fn permanently_delete(&self, kind: RecordType, id: &str) -> LifecycleResult<()> {
        let archived = self.require(kind, Partition::Archived, id)?;
        let path = StorePath::record(Partition::Archived, kind, id)?;
        self.repo
            .store()
            .apply_batch(&[WriteOp::delete(path, Expect::Version(archived.version))])?;
        info!("event=record_purge module=lifecycle status=ok kind={kind} id={id}");
        Ok(())
    }

    /// Resolves ids that exist in both partitions.
    ///
    /// The copy with the newer latest audit event is the move destination and
    /// is kept; on a tie the active copy is kept. Nested entries that exist
    /// only under the stale copy are carried into the kept copy before the
    /// stale copy is deleted.
    pub fn reconcile(&self, kind: RecordType) -> LifecycleResult<ReconcileReport> {
        let active: BTreeSet<String> = self
            .repo
            .list_ids(kind, Partition::Active)?
            .into_iter()
            .collect();
        let archived: BTreeSet<String> = self
            .repo
            .list_ids(kind, Partition::Archived)?
            .into_iter()
            .collect();

        let duplicates: Vec<&String> = active.intersection(&archived).collect();
        let mut report = ReconcileReport {
            duplicates_found: duplicates.len(),
            resolved: Vec::new(),
        };

        for id in duplicates {
            let (Some(active_copy), Some(archived_copy)) = (
                self.repo.get_record(kind, Partition::Active, id)?,
                self.repo.get_record(kind, Partition::Archived, id)?,
            ) else {
                continue;
            };

            let (kept, stale) = if archived_copy.last_moved_at() > active_copy.last_moved_at() {
                (archived_copy, active_copy)
            } else {
                (active_copy, archived_copy)
            };
            let kept_path = StorePath::record(kept.partition, kind, id)?;
            let stale_path = StorePath::record(stale.partition, kind, id)?;

            let store = self.repo.store();
            let present: BTreeSet<StorePath> = store
                .read_subtree(&kept_path)?
                .into_iter()
                .map(|document| document.path)
                .collect();
            let mut ops = Vec::new();
            for document in store.read_subtree(&stale_path)? {
                if document.path == stale_path {
                    continue;
                }
                let Some(path) = document.path.rebase(&stale_path, &kept_path) else {
                    continue;
                };
                if !present.contains(&path) {
                    ops.push(
                        WriteOp::put(path, document.body, Expect::Absent)
                            .with_version_floor(document.version + 1),
                    );
                }
            }
            let recovered_entries = ops.len();
            ops.push(WriteOp::delete(stale_path, Expect::Version(stale.version)));
            self.apply_steps(&ops, "record_reconcile", kind, id)?;

            warn!(
                "event=record_reconcile module=lifecycle status=resolved kind={kind} id={id} kept={} recovered_entries={recovered_entries}",
                kept.partition
            );
            report.resolved.push(ResolvedDuplicate {
                id: id.clone(),
                kept: kept.partition,
                recovered_entries,
            });
        }

        info!(
            "event=record_reconcile module=lifecycle status=ok kind={kind} duplicates={} resolved={}",
            report.duplicates_found,
            report.resolved.len()
        );
        Ok(report)
    }

    fn require(&self, kind: RecordType, partition: Partition, id: &str) -> LifecycleResult<Record> {
        self.repo
            .get_record(kind, partition, id)?
            .ok_or_else(|| LifecycleError::NotFound {
                kind,
                partition,
                id: id.to_string(),
            })
    }

    /// Copies `from`'s subtree to `to`'s partition as `to`, then deletes the
    /// source subtree.
    ///
    /// Nested documents are written before the record root, so a root at the
    /// destination always has its full subtree. Leftovers of an earlier
    /// failed copy (nested documents without a root) are cleared first.
    fn relocate(&self, from: &Record, to: &Record, event: &'static str) -> LifecycleResult<()> {
        let store = self.repo.store();
        let source = StorePath::record(from.partition, from.kind, &from.id)?;
        let destination = StorePath::record(to.partition, to.kind, &to.id)?;

        if store.read(&destination)?.is_some() {
            warn!(
                "event={event} module=lifecycle status=rejected kind={} id={} reason=destination_exists",
                from.kind, from.id
            );
            return Err(LifecycleError::AlreadyInPartition {
                kind: to.kind,
                partition: to.partition,
                id: to.id.clone(),
            });
        }

        let mut ops = vec![WriteOp::delete(destination.clone(), Expect::Absent)];
        for document in store.read_subtree(&source)? {
            if document.path == source {
                continue;
            }
            if let Some(path) = document.path.rebase(&source, &destination) {
                ops.push(
                    WriteOp::put(path, document.body, Expect::Any)
                        .with_version_floor(document.version + 1),
                );
            }
        }
        ops.push(record_put_op(to, Expect::Absent)?.with_version_floor(from.version + 1));
        ops.push(WriteOp::delete(source, Expect::Version(from.version)));

        self.apply_steps(&ops, event, from.kind, &from.id)?;
        info!(
            "event={event} module=lifecycle status=ok kind={} id={} nested_documents={} atomic={}",
            from.kind,
            from.id,
            ops.len() - 3,
            store.supports_atomic_batch()
        );
        Ok(())
    }

    /// Applies `ops` as one batch when the store allows it, otherwise one op
    /// at a time.
    fn apply_steps(
        &self,
        ops: &[WriteOp],
        event: &'static str,
        kind: RecordType,
        id: &str,
    ) -> LifecycleResult<()> {
        let store = self.repo.store();
        if store.supports_atomic_batch() {
            return store.apply_batch(ops).map_err(|err| {
                error!(
                    "event={event} module=lifecycle status=error kind={kind} id={id} atomic=true error={err}"
                );
                LifecycleError::Store(err)
            });
        }

        for (completed, op) in ops.iter().enumerate() {
            if let Err(err) = store.apply_batch(std::slice::from_ref(op)) {
                error!(
                    "event={event} module=lifecycle status=error kind={kind} id={id} atomic=false completed_steps={completed} total_steps={} error={err}",
                    ops.len()
                );
                if completed == 0 {
                    return Err(LifecycleError::Store(err));
                }
                return Err(LifecycleError::PartialMove {
                    kind,
                    id: id.to_string(),
                    completed_steps: completed,
                    total_steps: ops.len(),
                    source: err,
                });
            }
        }
        Ok(())
    }
}
