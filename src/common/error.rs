//! Common Error Types for the Transparency Service
//!
//! Provides unified error handling across all modules.

use thiserror::Error;

use crate::cose::CoseError;
use crate::storage::StorageError;
use crate::tlog::TlogError;

/// Coarse error kinds used for HTTP status mapping.
///
/// Cryptographic verification failures are not errors at all; verifiers
/// return `false`. Errors are reserved for structural problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// CBOR/JSON/path parse failures
    MalformedInput,
    /// A signature that should have verified did not
    SignatureInvalid,
    /// Unknown entry, tile, or checkpoint
    NotFound,
    /// Duplicate statement submission
    Conflict,
    /// Storage or metadata I/O failure
    Io,
    /// Registration refused by service policy
    Policy,
    /// Everything else
    Internal,
}

/// Root error type for the transparency service
#[derive(Debug, Error)]
pub enum ScittError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Object/metadata storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Tile log and proof engine errors
    #[error("log error: {0}")]
    Tlog(#[from] TlogError),

    /// COSE codec errors
    #[error("cose error: {0}")]
    Cose(#[from] CoseError),

    /// Malformed client input
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Signature validation failure
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// Unknown entity
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate statement
    #[error("conflict: {0}")]
    Conflict(String),

    /// Registration refused by policy
    #[error("policy refused registration: {0}")]
    Policy(String),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScittError {
    /// Create a malformed-input error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    /// Create a signature-invalid error
    pub fn signature(msg: impl Into<String>) -> Self {
        Self::SignatureInvalid(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a policy error
    pub fn policy(msg: impl Into<String>) -> Self {
        Self::Policy(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify into the coarse kinds the HTTP surface maps to statuses
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScittError::Config(_) => ErrorKind::Internal,
            ScittError::Storage(e) => match e {
                StorageError::NotFound(_) => ErrorKind::NotFound,
                StorageError::Duplicate(_) => ErrorKind::Conflict,
                StorageError::InvalidData(_) => ErrorKind::MalformedInput,
                _ => ErrorKind::Io,
            },
            ScittError::Tlog(e) => match e {
                TlogError::InvalidIndex { .. }
                | TlogError::InvalidRange { .. }
                | TlogError::MalformedProof(_)
                | TlogError::MalformedPath(_)
                | TlogError::MalformedCheckpoint(_) => ErrorKind::MalformedInput,
                TlogError::EmptyTree => ErrorKind::NotFound,
                TlogError::Storage(_) => ErrorKind::Io,
                TlogError::Signature(_) => ErrorKind::SignatureInvalid,
                TlogError::Corrupt(_) => ErrorKind::Internal,
            },
            ScittError::Cose(e) => match e {
                CoseError::Signature(_) => ErrorKind::SignatureInvalid,
                CoseError::Key(_) => ErrorKind::Internal,
                _ => ErrorKind::MalformedInput,
            },
            ScittError::MalformedInput(_) => ErrorKind::MalformedInput,
            ScittError::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            ScittError::NotFound(_) => ErrorKind::NotFound,
            ScittError::Conflict(_) => ErrorKind::Conflict,
            ScittError::Policy(_) => ErrorKind::Policy,
            ScittError::Internal(_) => ErrorKind::Internal,
            ScittError::Io(_) => ErrorKind::Io,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Io)
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::MalformedInput => "MALFORMED_INPUT",
            ErrorKind::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Io => "IO_ERROR",
            ErrorKind::Policy => "POLICY_REFUSED",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias using ScittError
pub type Result<T> = std::result::Result<T, ScittError>;
