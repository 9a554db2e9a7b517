//! Pure read-side helpers: identifiers, urgency and totals.
//!
//! Everything here is synchronous and side-effect free.

pub mod aggregate;
pub mod id_gen;
pub mod urgency;
