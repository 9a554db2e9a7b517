//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep callers decoupled from document paths and storage details.

pub mod ledger_service;
pub mod lifecycle_service;
pub mod record_service;
