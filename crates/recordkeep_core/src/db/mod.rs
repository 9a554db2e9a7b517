//! Storage bootstrap for the document store.
//!
//! # Responsibility
//! - Open the SQLite file (or an in-memory database) that backs
//!   `SqliteDocumentStore`, creating the file's directory when missing.
//! - Bring the `documents` schema up to date before handing out a connection.
//!
//! # Invariants
//! - Schema version lives in `PRAGMA user_version`; a newer file than this
//!   build understands is refused, never downgraded.
//! - Stores only receive connections whose migrations have all been applied.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failure to open or migrate the document database.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The database file's parent directory could not be created.
    CreateDirectory { dir: PathBuf, source: io::Error },
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::CreateDirectory { dir, source } => {
                write!(f, "cannot create database directory {}: {source}", dir.display())
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "document schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::CreateDirectory { source, .. } => Some(source),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
