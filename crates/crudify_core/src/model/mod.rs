//! Dynamic record model shared by every record type.
//!
//! # Responsibility
//! - Define the typed value and record shapes the engine moves around.
//! - Keep the soft-delete marker and identifier on every record.
//!
//! # Invariants
//! - Record equality covers the identifier and every field value.
//! - Soft delete flips `deleted`; it never drops the record.

pub mod method;
pub mod record;
pub mod value;
