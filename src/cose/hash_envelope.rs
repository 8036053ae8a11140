//! COSE Hash Envelopes
//!
//! A hash envelope is a COSE_Sign1 whose payload is the hash of an
//! external artifact rather than the artifact itself. The protected
//! headers carry the hash algorithm (label 258) and optionally the
//! preimage content type (259) and payload location (260).

use p256::ecdsa::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use super::sign1::{
    sign1_create, sign1_verify, CoseSign1, CwtClaims, ProtectedHeader, HASH_ALG_SHA256,
};
use super::CoseError;

/// Optional envelope headers
#[derive(Debug, Clone, Default)]
pub struct EnvelopeOptions {
    /// Content type of the artifact the hash covers (label 259)
    pub content_type: Option<String>,
    /// Where the artifact can be fetched (label 260)
    pub location: Option<String>,
}

/// Outcome of envelope verification: the signature and the artifact hash
/// are checked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeVerification {
    pub sig_valid: bool,
    pub hash_valid: bool,
}

impl EnvelopeVerification {
    pub fn is_valid(&self) -> bool {
        self.sig_valid && self.hash_valid
    }
}

/// Sign a hash envelope over `artifact` with SHA-256.
pub fn sign_envelope(
    artifact: &[u8],
    options: &EnvelopeOptions,
    key: &SigningKey,
    claims: Option<CwtClaims>,
) -> Result<CoseSign1, CoseError> {
    let mut protected = ProtectedHeader::es256();
    protected.payload_hash_alg = Some(HASH_ALG_SHA256);
    protected.preimage_content_type = options.content_type.clone();
    protected.payload_location = options.location.clone();
    protected.cwt_claims = claims;

    let payload = Sha256::digest(artifact).to_vec();
    sign1_create(protected, payload, key)
}

/// Verify a hash envelope against the artifact bytes.
///
/// Fails structurally when label 258 is absent or the payload is nil in
/// attached mode; otherwise reports signature and hash validity
/// separately.
pub fn verify_envelope(
    sign1: &CoseSign1,
    artifact: &[u8],
    key: &VerifyingKey,
) -> Result<EnvelopeVerification, CoseError> {
    let hash_alg = sign1
        .protected
        .payload_hash_alg
        .ok_or_else(|| CoseError::MissingHeader("payload hash algorithm (258)".to_string()))?;
    if hash_alg != HASH_ALG_SHA256 {
        return Err(CoseError::UnsupportedAlgorithm(hash_alg));
    }
    let payload = sign1
        .payload
        .as_ref()
        .ok_or_else(|| CoseError::MissingHeader("payload".to_string()))?;

    let sig_valid = sign1_verify(sign1, key, None)?;
    let hash_valid = payload.as_slice() == Sha256::digest(artifact).as_slice();
    Ok(EnvelopeVerification {
        sig_valid,
        hash_valid,
    })
}
