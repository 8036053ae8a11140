//! COSE Module
//!
//! CBOR Object Signing primitives for signed statements and receipts:
//!
//! - COSE_Sign1 encode/decode and ES256 sign/verify
//! - Service key lifecycle: PKCS#8 PEM, JWK and COSE_Key views,
//!   RFC 7638 thumbprints
//! - Hash envelopes: signatures over the hash of an external artifact

pub mod hash_envelope;
pub mod keys;
pub mod sign1;

use thiserror::Error;

/// COSE codec errors
#[derive(Debug, Error)]
pub enum CoseError {
    #[error("CBOR decode error: {0}")]
    Decode(String),

    #[error("CBOR encode error: {0}")]
    Encode(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(i64),

    #[error("missing required header: {0}")]
    MissingHeader(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("key error: {0}")]
    Key(String),
}

// Re-exports for convenience
pub use hash_envelope::{sign_envelope, verify_envelope, EnvelopeOptions, EnvelopeVerification};
pub use keys::ServiceKey;
pub use sign1::{
    decode_sign1, encode_sign1, sign1_create, sign1_verify, CoseSign1, CwtClaims, ProtectedHeader,
    ALG_ES256, HASH_ALG_SHA256,
};
