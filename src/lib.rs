//! SCITT Transparency Log Service
//!
//! An append-only, cryptographically verifiable log of signed statements:
//! clients submit COSE_Sign1 statements, the service appends each to a
//! tile-structured Merkle tree and returns a signed receipt proving
//! inclusion. Auditors verify inclusion of entries under advertised tree
//! heads and consistency between successive tree heads.
//!
//! ## Components
//!
//! - [`tlog`] - the tile log engine: Merkle tree over leaf hashes, tile
//!   persistence, RFC 6962 proofs, signed checkpoints
//! - [`cose`] - COSE_Sign1 codec, ES256 keys, hash envelopes
//! - [`registry`] - the registration pipeline and receipt synthesis
//! - [`storage`] - object store backends and the SQLite metadata store
//! - [`api`] - axum HTTP surface
//! - [`common`] - configuration, logging, errors

pub mod api;
pub mod common;
pub mod cose;
pub mod registry;
pub mod storage;
pub mod tlog;
pub mod types;

// Re-exports: error handling
pub use common::error::{ErrorKind, Result, ScittError};

// Re-exports: configuration
pub use common::config::ServiceConfig;

// Re-exports: core log engine
pub use tlog::{
    verify_consistency, verify_inclusion, Checkpoint, CheckpointSigner, TileLog, TlogError,
};

// Re-exports: COSE primitives
pub use cose::{decode_sign1, encode_sign1, CoseSign1, ServiceKey};

// Re-exports: registration
pub use registry::{Receipt, RegistrationOutcome, RegistrationService};

// Re-exports: HTTP surface
pub use api::{create_router, AppState, SharedAppState};
