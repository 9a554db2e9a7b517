//! Record use-case service.
//!
//! # Responsibility
//! - Create, read, list and update records in either partition.
//! - Attach uploaded files, detect duplicate contact numbers and stream
//!   record changes to watchers.
//! - Build cross-record views: the pending reminder queue and per-record
//!   financial summaries.
//!
//! # Invariants
//! - New ids are derived from both partitions of a type so a restored record
//!   never collides with a newer one.
//! - Updates are conditioned on the version the caller read.
//! - A failed upload leaves the record untouched.

use crate::calc::aggregate::{financial_summary, FinancialSummary};
use crate::calc::id_gen::next_id;
use crate::calc::urgency::{date_from_value, sort_reminders, NearPolicy, Reminder};
use crate::clock::{Clock, SystemClock};
use crate::model::comment::Comment;
use crate::model::record::{Partition, Record, RecordType};
use crate::model::sub_record::{fields, SubKind};
use crate::model::{ensure_business_fields, is_reserved_key, FieldMap, ModelError};
use crate::repo::record_repo::{record_from_document, record_put_op, RecordRepository, RepoError};
use crate::store::blob::{BlobStore, UploadError};
use crate::store::{DocumentStore, Expect, StoreError, StorePath, Subscription};
use log::{info, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Record types whose `contactNo` must be unique across the business.
const CONTACT_CHECKED_TYPES: [RecordType; 2] = [RecordType::Agent, RecordType::Client];

pub type RecordServiceResult<T> = Result<T, RecordServiceError>;

/// Service error for record use-cases.
#[derive(Debug)]
pub enum RecordServiceError {
    NotFound {
        kind: RecordType,
        partition: Partition,
        id: String,
    },
    Model(ModelError),
    /// Comment text is blank after trim.
    EmptyComment,
    Upload(UploadError),
    Store(StoreError),
    Repo(RepoError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for RecordServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound {
                kind,
                partition,
                id,
            } => write!(f, "{partition} record not found: {kind}/{id}"),
            Self::Model(err) => write!(f, "{err}"),
            Self::EmptyComment => write!(f, "comment text must not be blank"),
            Self::Upload(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent record state: {details}"),
        }
    }
}

impl Error for RecordServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Model(err) => Some(err),
            Self::Upload(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ModelError> for RecordServiceError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

impl From<UploadError> for RecordServiceError {
    fn from(value: UploadError) -> Self {
        Self::Upload(value)
    }
}

impl From<StoreError> for RecordServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RepoError> for RecordServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Store(err) => Self::Store(err),
            other => Self::Repo(other),
        }
    }
}

/// Record holding a given contact number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMatch {
    pub kind: RecordType,
    pub id: String,
}

/// Record service over a document store.
pub struct RecordService<S: DocumentStore, C: Clock = SystemClock> {
    repo: RecordRepository<S>,
    clock: C,
}

impl<S: DocumentStore> RecordService<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: DocumentStore, C: Clock> RecordService<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            repo: RecordRepository::new(store),
            clock,
        }
    }

    /// Creates an active record under the next sequential id for `kind`.
    pub fn create(&self, kind: RecordType, fields: FieldMap) -> RecordServiceResult<Record> {
        ensure_business_fields(&fields)?;

        let mut existing = self.repo.list_ids(kind, Partition::Active)?;
        existing.extend(self.repo.list_ids(kind, Partition::Archived)?);
        let id = next_id(existing.iter().map(String::as_str), kind.id_prefix());

        let record = Record::new(kind, id.as_str(), fields);
        self.repo
            .store()
            .apply_batch(&[record_put_op(&record, Expect::Absent)?])?;
        info!("event=record_create module=record status=ok kind={kind} id={id}");
        self.read_back(kind, Partition::Active, &id)
    }

    pub fn get(
        &self,
        kind: RecordType,
        partition: Partition,
        id: &str,
    ) -> RecordServiceResult<Option<Record>> {
        Ok(self.repo.get_record(kind, partition, id)?)
    }

    /// Records of one partition ordered by natural id.
    pub fn list(&self, kind: RecordType, partition: Partition) -> RecordServiceResult<Vec<Record>> {
        Ok(self.repo.list_records(kind, partition)?)
    }

    /// Merges `patch` into an active record's business fields.
    ///
    /// Fails with a version conflict when the record changed since
    /// `expected_version` was read.
    pub fn update_fields(
        &self,
        kind: RecordType,
        id: &str,
        patch: FieldMap,
        expected_version: u64,
    ) -> RecordServiceResult<Record> {
        ensure_business_fields(&patch)?;
        let mut record = self.require(kind, Partition::Active, id)?;
        record.fields.extend(patch);
        self.repo
            .store()
            .apply_batch(&[record_put_op(&record, Expect::Version(expected_version))?])?;
        info!("event=record_update module=record status=ok kind={kind} id={id}");
        self.read_back(kind, Partition::Active, id)
    }

    /// Prepends a comment to a record in either partition.
    pub fn comment(
        &self,
        kind: RecordType,
        partition: Partition,
        id: &str,
        text: &str,
    ) -> RecordServiceResult<Record> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RecordServiceError::EmptyComment);
        }
        let mut record = self.require(kind, partition, id)?;
        let version = record.version;
        record.add_comment(Comment::new(text, self.clock.now_ms()));
        self.repo
            .store()
            .apply_batch(&[record_put_op(&record, Expect::Version(version))?])?;
        self.read_back(kind, partition, id)
    }

    /// Active agents and clients whose `contactNo` equals `contact_no`.
    pub fn find_by_contact(&self, contact_no: &str) -> RecordServiceResult<Vec<ContactMatch>> {
        let value = Value::from(contact_no.trim());
        let mut matches = Vec::new();
        for kind in CONTACT_CHECKED_TYPES {
            let collection = StorePath::collection(Partition::Active, kind);
            for document in self
                .repo
                .store()
                .query_equal(&collection, fields::CONTACT_NO, &value)?
            {
                matches.push(ContactMatch {
                    kind,
                    id: document.path.last_segment().to_string(),
                });
            }
        }
        Ok(matches)
    }

    /// Whether another record already uses `contact_no`.
    ///
    /// `exclude` skips the record being edited.
    pub fn contact_in_use(
        &self,
        contact_no: &str,
        exclude: Option<(RecordType, &str)>,
    ) -> RecordServiceResult<bool> {
        Ok(self
            .find_by_contact(contact_no)?
            .iter()
            .any(|found| exclude != Some((found.kind, found.id.as_str()))))
    }

    /// Uploads `bytes` and stores the returned URL in `field`.
    pub fn attach_file<B: BlobStore>(
        &self,
        blobs: &B,
        kind: RecordType,
        id: &str,
        field: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> RecordServiceResult<Record> {
        if is_reserved_key(field) {
            return Err(ModelError::ReservedField(field.to_string()).into());
        }
        let mut record = self.require(kind, Partition::Active, id)?;
        let version = record.version;

        let upload_path = format!("{}/{id}/{field}/{file_name}", kind.collection());
        let url = blobs.upload(bytes, &upload_path).map_err(|err| {
            warn!(
                "event=record_attach module=record status=error kind={kind} id={id} error={err}"
            );
            RecordServiceError::Upload(err)
        })?;

        record.fields.insert(field.to_string(), Value::from(url));
        self.repo
            .store()
            .apply_batch(&[record_put_op(&record, Expect::Version(version))?])?;
        info!(
            "event=record_attach module=record status=ok kind={kind} id={id} size_bytes={}",
            bytes.len()
        );
        self.read_back(kind, Partition::Active, id)
    }

    /// Calls `on_change` with the record after each write to it or its
    /// nested entries; `None` once it leaves the partition.
    pub fn watch<F>(
        &self,
        kind: RecordType,
        partition: Partition,
        id: &str,
        on_change: F,
    ) -> RecordServiceResult<Subscription>
    where
        F: Fn(Option<Record>) + 'static,
    {
        let path = StorePath::record(partition, kind, id)?;
        let subscription = self.repo.store().subscribe(
            &path,
            Box::new(move |snapshot| match &snapshot.document {
                Some(document) => match record_from_document(document, kind) {
                    Ok(record) => on_change(Some(record)),
                    Err(err) => warn!(
                        "event=record_watch module=record status=error path={} error={err}",
                        snapshot.path
                    ),
                },
                None => on_change(None),
            }),
        )?;
        Ok(subscription)
    }

    /// Payment follow-ups across every active record, in display order.
    pub fn pending_reminders(&self, policy: NearPolicy) -> RecordServiceResult<Vec<Reminder>> {
        let today = self.clock.today();
        let mut reminders = Vec::new();
        for kind in RecordType::ALL {
            for record_id in self.repo.list_ids(kind, Partition::Active)? {
                let payments = self.repo.list_sub_records(
                    kind,
                    Partition::Active,
                    &record_id,
                    SubKind::Payment,
                )?;
                for payment in payments {
                    let date = payment
                        .fields
                        .get(fields::REMINDER_DATE)
                        .and_then(date_from_value);
                    let reminder = Reminder::new(kind, record_id.as_str(), payment.id, date, today);
                    if reminder.urgency.is_near(policy) {
                        reminders.push(reminder);
                    }
                }
            }
        }
        sort_reminders(&mut reminders);
        Ok(reminders)
    }

    pub fn pending_count(&self, policy: NearPolicy) -> RecordServiceResult<usize> {
        Ok(self.pending_reminders(policy)?.len())
    }

    /// Commission, paid and payroll totals for one active record.
    pub fn financial_summary(
        &self,
        kind: RecordType,
        id: &str,
    ) -> RecordServiceResult<FinancialSummary> {
        self.require(kind, Partition::Active, id)?;
        let payments = self
            .repo
            .load_sub_ledger(kind, Partition::Active, id, SubKind::Payment)?;
        let workers = self
            .repo
            .load_sub_ledger(kind, Partition::Active, id, SubKind::Worker)?;
        Ok(financial_summary(
            payments.field_maps(),
            workers.field_maps(),
        ))
    }

    fn require(
        &self,
        kind: RecordType,
        partition: Partition,
        id: &str,
    ) -> RecordServiceResult<Record> {
        self.repo
            .get_record(kind, partition, id)?
            .ok_or_else(|| RecordServiceError::NotFound {
                kind,
                partition,
                id: id.to_string(),
            })
    }

    fn read_back(
        &self,
        kind: RecordType,
        partition: Partition,
        id: &str,
    ) -> RecordServiceResult<Record> {
        self.repo
            .get_record(kind, partition, id)?
            .ok_or(RecordServiceError::InconsistentState(
                "record not found in read-back",
            ))
    }
}
