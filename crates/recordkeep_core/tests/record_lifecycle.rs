use chrono::NaiveDate;
use recordkeep_core::db::open_db_in_memory;
use recordkeep_core::model::record::AuditAction;
use recordkeep_core::store::{ChangeCallback, Document, StoreResult, Subscription, WriteOp};
use recordkeep_core::{
    DocumentStore, FieldMap, FixedClock, LedgerRef, LedgerService, LedgerServiceError,
    LifecycleError, LifecycleManager, Partition, RecordService, RecordServiceError, RecordType,
    SqliteDocumentStore, StoreError, StorePath, SubKind,
};
use serde_json::{json, Value};
use std::cell::Cell;

const NOW: i64 = 1_736_500_000_000;

fn clock() -> FixedClock {
    FixedClock::new(NOW, NaiveDate::from_ymd_opt(2025, 1, 10).unwrap())
}

fn fields(pairs: &[(&str, Value)]) -> FieldMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn hospital_with_payment(store: &SqliteDocumentStore<'_>, clock: &FixedClock) -> String {
    let records = RecordService::with_clock(store, clock);
    let hospital = records
        .create(
            RecordType::Hospital,
            fields(&[("name", json!("City Care")), ("beds", json!(40))]),
        )
        .unwrap();

    let ledger = LedgerService::with_clock(store, clock);
    ledger
        .add(
            LedgerRef::new(RecordType::Hospital, &hospital.id, SubKind::Payment),
            fields(&[("paymentMode", json!("cash")), ("commission", json!(250))]),
        )
        .unwrap();
    hospital.id
}

/// Delegating store that reports non-atomic batches and fails the n-th
/// `apply_batch` call.
struct FlakyStore<'a> {
    inner: &'a SqliteDocumentStore<'a>,
    fail_on_call: usize,
    calls: Cell<usize>,
}

impl<'a> FlakyStore<'a> {
    fn new(inner: &'a SqliteDocumentStore<'a>, fail_on_call: usize) -> Self {
        Self {
            inner,
            fail_on_call,
            calls: Cell::new(0),
        }
    }
}

impl DocumentStore for FlakyStore<'_> {
    fn read(&self, path: &StorePath) -> StoreResult<Option<Document>> {
        self.inner.read(path)
    }

    fn list_children(&self, path: &StorePath) -> StoreResult<Vec<Document>> {
        self.inner.list_children(path)
    }

    fn read_subtree(&self, path: &StorePath) -> StoreResult<Vec<Document>> {
        self.inner.read_subtree(path)
    }

    fn apply_batch(&self, ops: &[WriteOp]) -> StoreResult<()> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        if call == self.fail_on_call {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        self.inner.apply_batch(ops)
    }

    fn supports_atomic_batch(&self) -> bool {
        false
    }

    fn subscribe(&self, path: &StorePath, on_change: ChangeCallback) -> StoreResult<Subscription> {
        self.inner.subscribe(path, on_change)
    }
}

#[test]
fn archive_then_restore_keeps_id_fields_and_full_audit_trail() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);
    let records = RecordService::with_clock(&store, &clock);
    let original = records
        .get(RecordType::Hospital, Partition::Active, &id)
        .unwrap()
        .unwrap();

    let lifecycle = LifecycleManager::with_clock(&store, &clock);
    let archived = lifecycle
        .archive(RecordType::Hospital, &id, Some("  contract ended  "))
        .unwrap();
    assert_eq!(archived.partition, Partition::Archived);
    assert_eq!(archived.id, id);
    assert_eq!(archived.original_id(), Some(id.as_str()));
    assert_eq!(archived.moved_at(), Some(NOW));
    assert_eq!(archived.archive_reason(), Some("contract ended"));
    assert!(records
        .get(RecordType::Hospital, Partition::Active, &id)
        .unwrap()
        .is_none());

    clock.advance(60_000);
    let restored = lifecycle
        .restore(RecordType::Hospital, &id, "renewed")
        .unwrap();
    assert_eq!(restored.partition, Partition::Active);
    assert_eq!(restored.id, id);
    assert_eq!(restored.fields, original.fields);
    assert_eq!(restored.restored_at(), Some(NOW + 60_000));
    assert_eq!(restored.revert_reason(), Some("renewed"));
    assert_eq!(restored.moved_at(), None);

    let actions: Vec<AuditAction> = restored.audit_trail.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Archived, AuditAction::Restored]);
    assert!(records
        .get(RecordType::Hospital, Partition::Archived, &id)
        .unwrap()
        .is_none());
}

#[test]
fn nested_entries_travel_with_the_record() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);

    LifecycleManager::with_clock(&store, &clock)
        .archive(RecordType::Hospital, &id, None)
        .unwrap();

    let archived_payments = StorePath::sub_collection(
        Partition::Archived,
        RecordType::Hospital,
        &id,
        SubKind::Payment,
    )
    .unwrap();
    let moved = store.list_children(&archived_payments).unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].body["commission"], json!(250));

    let active_root = StorePath::record(Partition::Active, RecordType::Hospital, &id).unwrap();
    assert!(store.read_subtree(&active_root).unwrap().is_empty());

    let ledger = LedgerService::with_clock(&store, &clock);
    let err = ledger
        .list(LedgerRef::new(RecordType::Hospital, &id, SubKind::Payment))
        .unwrap_err();
    assert!(matches!(err, LedgerServiceError::ParentNotFound { .. }));
}

#[test]
fn restore_requires_a_reason_and_leaves_record_archived() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);
    let lifecycle = LifecycleManager::with_clock(&store, &clock);
    lifecycle.archive(RecordType::Hospital, &id, None).unwrap();

    let err = lifecycle
        .restore(RecordType::Hospital, &id, "   ")
        .unwrap_err();
    assert!(matches!(err, LifecycleError::ReasonRequired));

    let records = RecordService::with_clock(&store, &clock);
    assert!(records
        .get(RecordType::Hospital, Partition::Archived, &id)
        .unwrap()
        .is_some());
}

#[test]
fn missing_records_are_reported_per_partition() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let lifecycle = LifecycleManager::new(&store);

    match lifecycle.archive(RecordType::Agent, "AW9", None) {
        Err(LifecycleError::NotFound { partition, id, .. }) => {
            assert_eq!(partition, Partition::Active);
            assert_eq!(id, "AW9");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(
        lifecycle.permanently_delete(RecordType::Agent, "AW9"),
        Err(LifecycleError::NotFound {
            partition: Partition::Archived,
            ..
        })
    ));
}

#[test]
fn permanent_delete_removes_archived_subtree() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);
    let lifecycle = LifecycleManager::with_clock(&store, &clock);
    lifecycle.archive(RecordType::Hospital, &id, None).unwrap();

    lifecycle
        .permanently_delete(RecordType::Hospital, &id)
        .unwrap();

    let archived_root = StorePath::record(Partition::Archived, RecordType::Hospital, &id).unwrap();
    assert!(store.read_subtree(&archived_root).unwrap().is_empty());
}

#[test]
fn failure_before_any_step_changes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);

    let flaky = FlakyStore::new(&store, 1);
    let err = LifecycleManager::with_clock(&flaky, &clock)
        .archive(RecordType::Hospital, &id, None)
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Store(StoreError::Unavailable(_))));

    let records = RecordService::with_clock(&store, &clock);
    assert!(records
        .get(RecordType::Hospital, Partition::Active, &id)
        .unwrap()
        .is_some());
    assert!(records
        .get(RecordType::Hospital, Partition::Archived, &id)
        .unwrap()
        .is_none());
}

#[test]
fn interrupted_move_is_reported_and_reconciled() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);

    // Steps: clear destination leftovers, write payment, write record, delete source.
    let flaky = FlakyStore::new(&store, 4);
    let err = LifecycleManager::with_clock(&flaky, &clock)
        .archive(RecordType::Hospital, &id, Some("closing"))
        .unwrap_err();
    match err {
        LifecycleError::PartialMove {
            completed_steps,
            total_steps,
            ..
        } => {
            assert_eq!(completed_steps, 3);
            assert_eq!(total_steps, 4);
        }
        other => panic!("unexpected error: {other}"),
    }

    let records = RecordService::with_clock(&store, &clock);
    assert!(records
        .get(RecordType::Hospital, Partition::Active, &id)
        .unwrap()
        .is_some());
    assert!(records
        .get(RecordType::Hospital, Partition::Archived, &id)
        .unwrap()
        .is_some());

    let lifecycle = LifecycleManager::with_clock(&store, &clock);
    let report = lifecycle.reconcile(RecordType::Hospital).unwrap();
    assert_eq!(report.duplicates_found, 1);
    assert_eq!(report.resolved.len(), 1);
    assert_eq!(report.resolved[0].id, id);
    assert_eq!(report.resolved[0].kept, Partition::Archived);
    assert_eq!(report.resolved[0].recovered_entries, 0);

    assert!(records
        .get(RecordType::Hospital, Partition::Active, &id)
        .unwrap()
        .is_none());
    let archived_payments = StorePath::sub_collection(
        Partition::Archived,
        RecordType::Hospital,
        &id,
        SubKind::Payment,
    )
    .unwrap();
    assert_eq!(store.list_children(&archived_payments).unwrap().len(), 1);

    let second = lifecycle.reconcile(RecordType::Hospital).unwrap();
    assert_eq!(second.duplicates_found, 0);
}

#[test]
fn interrupted_restore_keeps_the_restored_copy() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);
    LifecycleManager::with_clock(&store, &clock)
        .archive(RecordType::Hospital, &id, None)
        .unwrap();

    clock.advance(1_000);
    let flaky = FlakyStore::new(&store, 4);
    let err = LifecycleManager::with_clock(&flaky, &clock)
        .restore(RecordType::Hospital, &id, "reopened")
        .unwrap_err();
    assert!(matches!(err, LifecycleError::PartialMove { .. }));

    let report = LifecycleManager::with_clock(&store, &clock)
        .reconcile(RecordType::Hospital)
        .unwrap();
    assert_eq!(report.resolved[0].kept, Partition::Active);

    let restored = RecordService::with_clock(&store, &clock)
        .get(RecordType::Hospital, Partition::Active, &id)
        .unwrap()
        .unwrap();
    assert_eq!(restored.revert_reason(), Some("reopened"));
    assert_eq!(restored.audit_trail.len(), 2);
}

fn payment_count(store: &SqliteDocumentStore<'_>, partition: Partition, id: &str) -> usize {
    let payments =
        StorePath::sub_collection(partition, RecordType::Hospital, id, SubKind::Payment).unwrap();
    store.list_children(&payments).unwrap().len()
}

fn add_payment(store: &SqliteDocumentStore<'_>, clock: &FixedClock, id: &str) -> String {
    LedgerService::with_clock(store, clock)
        .add(
            LedgerRef::new(RecordType::Hospital, id, SubKind::Payment),
            fields(&[("paymentMode", json!("upi")), ("commission", json!(90))]),
        )
        .unwrap()
        .id
}

#[test]
fn failed_nested_copy_leaves_no_record_at_destination() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);
    add_payment(&store, &clock, &id);

    // Steps: clear destination, PAY1, PAY2, record, delete source.
    let flaky = FlakyStore::new(&store, 3);
    match LifecycleManager::with_clock(&flaky, &clock).archive(RecordType::Hospital, &id, None) {
        Err(LifecycleError::PartialMove {
            completed_steps,
            total_steps,
            ..
        }) => {
            assert_eq!(completed_steps, 2);
            assert_eq!(total_steps, 5);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let records = RecordService::with_clock(&store, &clock);
    assert!(records
        .get(RecordType::Hospital, Partition::Archived, &id)
        .unwrap()
        .is_none());
    let lifecycle = LifecycleManager::with_clock(&store, &clock);
    assert_eq!(lifecycle.reconcile(RecordType::Hospital).unwrap().duplicates_found, 0);
    assert_eq!(payment_count(&store, Partition::Active, &id), 2);

    lifecycle.archive(RecordType::Hospital, &id, None).unwrap();
    assert_eq!(payment_count(&store, Partition::Archived, &id), 2);
    assert_eq!(payment_count(&store, Partition::Active, &id), 0);
}

#[test]
fn reconcile_keeps_entries_added_to_the_stale_copy() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);

    let flaky = FlakyStore::new(&store, 4);
    assert!(matches!(
        LifecycleManager::with_clock(&flaky, &clock).archive(RecordType::Hospital, &id, None),
        Err(LifecycleError::PartialMove { .. })
    ));
    let late = add_payment(&store, &clock, &id);
    assert_eq!(payment_count(&store, Partition::Active, &id), 2);
    assert_eq!(payment_count(&store, Partition::Archived, &id), 1);

    let report = LifecycleManager::with_clock(&store, &clock)
        .reconcile(RecordType::Hospital)
        .unwrap();
    assert_eq!(report.resolved[0].kept, Partition::Archived);
    assert_eq!(report.resolved[0].recovered_entries, 1);

    assert_eq!(payment_count(&store, Partition::Active, &id), 0);
    assert_eq!(payment_count(&store, Partition::Archived, &id), 2);
    let carried = StorePath::sub_record(
        Partition::Archived,
        RecordType::Hospital,
        &id,
        SubKind::Payment,
        &late,
    )
    .unwrap();
    assert_eq!(store.read(&carried).unwrap().unwrap().body["commission"], json!(90));
}

#[test]
fn move_onto_an_existing_copy_is_refused() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);

    let flaky = FlakyStore::new(&store, 4);
    assert!(LifecycleManager::with_clock(&flaky, &clock)
        .archive(RecordType::Hospital, &id, None)
        .is_err());
    add_payment(&store, &clock, &id);

    let lifecycle = LifecycleManager::with_clock(&store, &clock);
    match lifecycle.restore(RecordType::Hospital, &id, "undo") {
        Err(LifecycleError::AlreadyInPartition { partition, .. }) => {
            assert_eq!(partition, Partition::Active);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(payment_count(&store, Partition::Active, &id), 2);
    assert_eq!(payment_count(&store, Partition::Archived, &id), 1);
}

#[test]
fn round_trip_never_reuses_an_earlier_version() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let clock = clock();
    let id = hospital_with_payment(&store, &clock);
    let records = RecordService::with_clock(&store, &clock);
    let stale = records
        .get(RecordType::Hospital, Partition::Active, &id)
        .unwrap()
        .unwrap();
    let payment_path = StorePath::sub_record(
        Partition::Active,
        RecordType::Hospital,
        &id,
        SubKind::Payment,
        "PAY1",
    )
    .unwrap();
    let stale_payment = store.read(&payment_path).unwrap().unwrap().version;

    let lifecycle = LifecycleManager::with_clock(&store, &clock);
    let archived = lifecycle.archive(RecordType::Hospital, &id, None).unwrap();
    assert!(archived.version > stale.version);
    let restored = lifecycle
        .restore(RecordType::Hospital, &id, "back")
        .unwrap();
    assert!(restored.version > archived.version);
    assert!(store.read(&payment_path).unwrap().unwrap().version > stale_payment);

    let err = records
        .update_fields(
            RecordType::Hospital,
            &id,
            fields(&[("name", json!("Stale Edit"))]),
            stale.version,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RecordServiceError::Store(StoreError::VersionConflict { .. })
    ));
}
