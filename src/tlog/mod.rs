//! Tile Log Module
//!
//! The verifiable log engine: an append-only Merkle tree over 32-byte
//! leaf values, stored as fixed-width tiles in the object store, with
//! RFC 6962 inclusion and consistency proofs and signed-note checkpoints.
//!
//! This module contains:
//! - Leaf/node hashing with RFC 6962 domain separation
//! - Tile path encoding and strict parsing
//! - The single-writer tile log with crash recovery
//! - Proof generation and pure proof verification
//! - Checkpoint (signed tree head) create/encode/decode/verify

pub mod checkpoint;
pub mod hash;
pub mod log;
pub mod path;
pub mod proof;

use thiserror::Error;

use crate::storage::StorageError;

/// Tile log and proof engine errors.
///
/// These are structural failures. A proof that is well-formed but does
/// not match the claimed root is not an error; verifiers return `false`.
#[derive(Debug, Error)]
pub enum TlogError {
    #[error("invalid leaf index {index} for tree size {tree_size}")]
    InvalidIndex { index: u64, tree_size: u64 },

    #[error("invalid tree range {from}..{to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("malformed tile path: {0}")]
    MalformedPath(String),

    #[error("malformed checkpoint: {0}")]
    MalformedCheckpoint(String),

    #[error("empty tree has no root")]
    EmptyTree,

    #[error("signing failure: {0}")]
    Signature(String),

    #[error("log state corrupt: {0}")]
    Corrupt(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

// Re-exports for convenience
pub use checkpoint::{Checkpoint, CheckpointSigner};
pub use hash::{leaf_hash, node_hash, Hash, HASH_SIZE};
pub use log::{TileLog, TileReader, TILE_WIDTH};
pub use proof::{verify_consistency, verify_inclusion};
