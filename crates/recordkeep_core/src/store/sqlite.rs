//! SQLite-backed document store.
//!
//! # Responsibility
//! - Persist path-addressed JSON documents in the `documents` table.
//! - Commit batches atomically and enforce write preconditions.
//! - Push snapshots to in-process subscribers after each commit.
//!
//! # Invariants
//! - Batches run inside one `IMMEDIATE` transaction; a failed precondition
//!   rolls back every op of the batch.
//! - Subscribers are notified only after a successful commit.

use crate::db::migrations::latest_version;
use crate::model::FieldMap;
use crate::store::subscribers::SubscriberRegistry;
use crate::store::{
    ChangeCallback, Document, DocumentStore, Expect, Snapshot, StoreError, StorePath,
    StoreResult, Subscription, WriteOp,
};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::cell::RefCell;
use std::rc::Rc;

const DOCUMENT_SELECT_SQL: &str = "SELECT path, body, version, updated_at FROM documents";

/// Document store over a migrated SQLite connection.
///
/// Share one instance (by reference) between services so subscribers see
/// every write made through it.
pub struct SqliteDocumentStore<'conn> {
    conn: &'conn Connection,
    subscribers: Rc<RefCell<SubscriberRegistry>>,
}

impl<'conn> SqliteDocumentStore<'conn> {
    /// Creates a store from a connection returned by `open_db*`.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self {
            conn,
            subscribers: Rc::new(RefCell::new(SubscriberRegistry::default())),
        })
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn notify(&self, changed: &[StorePath]) {
        let affected = self.subscribers.borrow().affected(changed);
        for (path, callback) in affected {
            match self.read(&path) {
                Ok(document) => callback(&Snapshot { path, document }),
                Err(err) => warn!(
                    "event=store_notify module=store status=error path={path} error={err}"
                ),
            }
        }
    }
}

impl DocumentStore for SqliteDocumentStore<'_> {
    fn read(&self, path: &StorePath) -> StoreResult<Option<Document>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{DOCUMENT_SELECT_SQL} WHERE path = ?1;"))?;
        let mut rows = stmt.query([path.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_document_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_children(&self, path: &StorePath) -> StoreResult<Vec<Document>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DOCUMENT_SELECT_SQL} WHERE parent_path = ?1 ORDER BY path ASC;"
        ))?;
        let mut rows = stmt.query([path.as_str()])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(parse_document_row(row)?);
        }
        Ok(documents)
    }

    fn read_subtree(&self, path: &StorePath) -> StoreResult<Vec<Document>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DOCUMENT_SELECT_SQL}
             WHERE path = ?1
                OR substr(path, 1, length(?1) + 1) = ?1 || '/'
             ORDER BY path ASC;"
        ))?;
        let mut rows = stmt.query([path.as_str()])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(parse_document_row(row)?);
        }
        Ok(documents)
    }

    fn apply_batch(&self, ops: &[WriteOp]) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for op in ops {
            apply_op(&tx, op)?;
        }
        tx.commit()?;

        debug!(
            "event=store_batch module=store status=ok ops={}",
            ops.len()
        );
        let changed: Vec<StorePath> = ops.iter().map(|op| op.path().clone()).collect();
        self.notify(&changed);
        Ok(())
    }

    fn supports_atomic_batch(&self) -> bool {
        true
    }

    fn subscribe(&self, path: &StorePath, on_change: ChangeCallback) -> StoreResult<Subscription> {
        Ok(SubscriberRegistry::register(
            &self.subscribers,
            path.clone(),
            on_change,
        ))
    }
}

fn apply_op(tx: &Transaction<'_>, op: &WriteOp) -> StoreResult<()> {
    let path = op.path();
    let actual = current_version(tx, path)?;
    let expect = match op {
        WriteOp::Put { expect, .. } | WriteOp::Delete { expect, .. } => *expect,
    };
    if !expect.holds(actual) {
        return Err(StoreError::VersionConflict {
            path: path.to_string(),
            expected: expect,
            actual,
        });
    }

    match op {
        WriteOp::Put {
            body,
            version_floor,
            ..
        } => {
            let body_text = encode_body(body)?;
            let floor = i64::try_from(*version_floor).map_err(|_| {
                StoreError::InvalidData(format!("version floor out of range at `{path}`"))
            })?;
            match actual {
                Some(_) => {
                    tx.execute(
                        "UPDATE documents
                         SET body = ?2,
                             version = max(version + 1, ?3),
                             updated_at = (strftime('%s', 'now') * 1000)
                         WHERE path = ?1;",
                        params![path.as_str(), body_text, floor],
                    )?;
                }
                None => {
                    tx.execute(
                        "INSERT INTO documents (path, parent_path, body, version)
                         VALUES (?1, ?2, ?3, max(1, ?4));",
                        params![path.as_str(), path.parent_str(), body_text, floor],
                    )?;
                }
            }
        }
        WriteOp::Delete { .. } => {
            tx.execute(
                "DELETE FROM documents
                 WHERE path = ?1
                    OR substr(path, 1, length(?1) + 1) = ?1 || '/';",
                [path.as_str()],
            )?;
        }
    }
    Ok(())
}

fn current_version(conn: &Connection, path: &StorePath) -> StoreResult<Option<u64>> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM documents WHERE path = ?1;",
            [path.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    version.map(|value| parse_version(value, path.as_str())).transpose()
}

fn encode_body(body: &FieldMap) -> StoreResult<String> {
    serde_json::to_string(body)
        .map_err(|err| StoreError::InvalidData(format!("cannot encode document body: {err}")))
}

fn parse_document_row(row: &Row<'_>) -> StoreResult<Document> {
    let path_text: String = row.get("path")?;
    let path = StorePath::parse(&path_text).map_err(|_| {
        StoreError::InvalidData(format!("invalid path `{path_text}` in documents.path"))
    })?;

    let body_text: String = row.get("body")?;
    let body: FieldMap = serde_json::from_str(&body_text).map_err(|err| {
        StoreError::InvalidData(format!("invalid JSON object at `{path_text}`: {err}"))
    })?;

    let version = parse_version(row.get("version")?, &path_text)?;

    Ok(Document {
        path,
        body,
        version,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_version(value: i64, path: &str) -> StoreResult<u64> {
    u64::try_from(value)
        .ok()
        .filter(|version| *version > 0)
        .ok_or_else(|| StoreError::InvalidData(format!("invalid version `{value}` at `{path}`")))
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::SqliteDocumentStore;
    use crate::db::open_db_in_memory;
    use crate::model::FieldMap;
    use crate::store::{DocumentStore, Expect, StoreError, StorePath, WriteOp};
    use rusqlite::Connection;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn body(name: &str) -> FieldMap {
        let mut body = FieldMap::new();
        body.insert("name".to_string(), json!(name));
        body
    }

    fn path(value: &str) -> StorePath {
        StorePath::parse(value).unwrap()
    }

    #[test]
    fn unmigrated_connection_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = SqliteDocumentStore::try_new(&conn).err().unwrap();
        assert!(matches!(err, StoreError::UninitializedConnection { .. }));
    }

    #[test]
    fn put_increments_version_and_delete_removes_subtree() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteDocumentStore::try_new(&conn).unwrap();

        let record = path("active/agents/AW1");
        store.write(&record, body("a"), Expect::Absent).unwrap();
        store.write(&record, body("b"), Expect::Version(1)).unwrap();
        store
            .write(&path("active/agents/AW1/payments/PAY1"), body("p"), Expect::Any)
            .unwrap();
        store.write(&path("active/agents/AW10"), body("c"), Expect::Any).unwrap();

        let loaded = store.read(&record).unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.body["name"], json!("b"));
        assert_eq!(store.read_subtree(&record).unwrap().len(), 2);

        store.delete(&record).unwrap();
        assert!(store.read_subtree(&record).unwrap().is_empty());
        assert!(store.read(&path("active/agents/AW10")).unwrap().is_some());
    }

    #[test]
    fn failed_precondition_rolls_back_whole_batch() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteDocumentStore::try_new(&conn).unwrap();
        store.write(&path("active/clients/CL1"), body("x"), Expect::Any).unwrap();

        let err = store
            .apply_batch(&[
                WriteOp::put(path("archived/clients/CL1"), body("x"), Expect::Any),
                WriteOp::delete(path("active/clients/CL1"), Expect::Version(7)),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict { actual: Some(1), .. }
        ));
        assert!(store.read(&path("archived/clients/CL1")).unwrap().is_none());
        assert!(store.read(&path("active/clients/CL1")).unwrap().is_some());
    }

    #[test]
    fn version_floor_lifts_inserted_and_updated_versions() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteDocumentStore::try_new(&conn).unwrap();
        let record = path("archived/agents/AW3");

        store
            .apply_batch(&[
                WriteOp::put(record.clone(), body("a"), Expect::Absent).with_version_floor(6),
            ])
            .unwrap();
        assert_eq!(store.read(&record).unwrap().unwrap().version, 6);

        store
            .apply_batch(&[
                WriteOp::put(record.clone(), body("b"), Expect::Version(6)).with_version_floor(2),
            ])
            .unwrap();
        assert_eq!(store.read(&record).unwrap().unwrap().version, 7);

        let delete = WriteOp::delete(record.clone(), Expect::Any).with_version_floor(9);
        assert_eq!(delete, WriteOp::delete(record, Expect::Any));
    }

    #[test]
    fn subscribers_receive_snapshots_until_unsubscribed() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteDocumentStore::try_new(&conn).unwrap();
        let seen: Rc<RefCell<Vec<Option<u64>>>> = Rc::default();

        let sink = Rc::clone(&seen);
        let subscription = store
            .subscribe(
                &path("active/hospitals/HP1"),
                Box::new(move |snapshot| {
                    sink.borrow_mut()
                        .push(snapshot.document.as_ref().map(|doc| doc.version));
                }),
            )
            .unwrap();
        assert_eq!(store.subscriber_count(), 1);

        store.write(&path("active/hospitals/HP1"), body("a"), Expect::Any).unwrap();
        store
            .write(&path("active/hospitals/HP1/payments/PAY1"), body("p"), Expect::Any)
            .unwrap();
        store.write(&path("active/hospitals/HP2"), body("b"), Expect::Any).unwrap();
        store.delete(&path("active/hospitals/HP1")).unwrap();
        subscription.unsubscribe();
        store.write(&path("active/hospitals/HP1"), body("c"), Expect::Any).unwrap();

        assert_eq!(*seen.borrow(), vec![Some(1), Some(1), None]);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn query_equal_matches_top_level_fields_of_children() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteDocumentStore::try_new(&conn).unwrap();
        let mut with_contact = body("a");
        with_contact.insert("contactNo".to_string(), json!("9876543210"));
        store
            .write(&path("active/agents/AW1"), with_contact, Expect::Any)
            .unwrap();
        store.write(&path("active/agents/AW2"), body("b"), Expect::Any).unwrap();

        let hits = store
            .query_equal(&path("active/agents"), "contactNo", &json!("9876543210"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path.last_segment(), "AW1");
    }
}
