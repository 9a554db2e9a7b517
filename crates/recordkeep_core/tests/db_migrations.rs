use recordkeep_core::db::migrations::latest_version;
use recordkeep_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "documents");
}

#[test]
fn reopening_file_database_keeps_documents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recordkeep.db");

    let conn_first = open_db(&path).unwrap();
    conn_first
        .execute(
            "INSERT INTO documents (path, parent_path, body, version)
             VALUES ('active/hospitals/HP1', 'active/hospitals', '{}', 1);",
            [],
        )
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let count: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM documents;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn open_db_creates_missing_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("nested").join("recordkeep.db");

    let conn = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    assert!(path.exists());
}

#[test]
fn open_db_reports_unusable_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let err = open_db(blocker.join("recordkeep.db")).unwrap_err();
    assert!(matches!(err, DbError::CreateDirectory { dir, .. } if dir == blocker));
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
