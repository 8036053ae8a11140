//! Shared Types Module
//!
//! Domain records used across the registration pipeline, metadata store,
//! and HTTP surface.

pub mod statement;

pub use statement::{ReceiptRecord, StatementRecord, TreeStateRow};
