//! Core domain logic for RecordKeep.
//! Record lifecycle, nested ledgers and their storage live here; callers
//! only see typed records and services.

pub mod calc;
pub mod clock;
pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use calc::aggregate::{financial_summary, payroll, sum, FinancialSummary, PayrollSummary};
pub use calc::id_gen::next_id;
pub use calc::urgency::{classify, NearPolicy, Reminder, Urgency};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{load_config, ConfigError, CoreConfig};
pub use ledger::{EditOutcome, LedgerError, LockPolicy, RemoveOutcome, SubLedger, ValidationErrors};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::record::{Partition, Record, RecordType};
pub use model::sub_record::{SubKind, SubRecord};
pub use model::FieldMap;
pub use repo::record_repo::{RecordRepository, RepoError, RepoResult};
pub use service::ledger_service::{LedgerRef, LedgerService, LedgerServiceError};
pub use service::lifecycle_service::{LifecycleError, LifecycleManager, ReconcileReport};
pub use service::record_service::{RecordService, RecordServiceError};
pub use store::{DocumentStore, Expect, SqliteDocumentStore, StoreError, StorePath};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
