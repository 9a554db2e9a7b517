//! Repository layer mapping domain records onto the document store.
//!
//! # Responsibility
//! - Isolate document encoding from lifecycle/ledger orchestration.
//!
//! # Invariants
//! - Read paths reject invalid persisted state instead of masking it.

pub mod record_repo;
