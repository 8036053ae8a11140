//! Signed Checkpoints (Signed Tree Heads)
//!
//! A checkpoint commits the service to `(origin, tree_size, root_hash,
//! timestamp)` in the signed-note text format:
//!
//! ```text
//! https://transparency.example.com
//! 42
//! <64 lowercase hex chars>
//! 1724239932000
//!
//! — https://transparency.example.com <base64 signature>
//! ```
//!
//! The signature covers the first four lines, each terminated by `\n`.
//! The signature line starts with U+2014 (em dash). Decoding also accepts
//! a base64 root hash for backward compatibility; either way the decoded
//! root must be exactly 32 bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};

use super::hash::{Hash, HASH_SIZE};
use super::TlogError;

/// Separator opening the signature line
const SIGNATURE_PREFIX: &str = "\u{2014} ";

/// A signed tree head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub origin: String,
    pub tree_size: u64,
    pub root: Hash,
    pub timestamp_ms: i64,
    /// Raw 64-byte ES256 signature over the canonical payload
    pub signature: Vec<u8>,
}

impl Checkpoint {
    /// The exact byte string covered by the signature.
    pub fn signed_payload(origin: &str, tree_size: u64, root: &Hash, timestamp_ms: i64) -> String {
        format!(
            "{}\n{}\n{}\n{}\n",
            origin,
            tree_size,
            hex::encode(root),
            timestamp_ms
        )
    }

    /// Encode as the signed-note wire format.
    pub fn encode(&self) -> String {
        format!(
            "{}\n{}{} {}\n",
            Self::signed_payload(&self.origin, self.tree_size, &self.root, self.timestamp_ms),
            SIGNATURE_PREFIX,
            self.origin,
            BASE64.encode(&self.signature)
        )
    }

    /// Parse the signed-note wire format.
    pub fn decode(text: &str) -> Result<Self, TlogError> {
        let malformed = |what: &str| TlogError::MalformedCheckpoint(what.to_string());

        let lines: Vec<&str> = text.split('\n').collect();
        // origin, size, root, timestamp, blank, signature, trailing empty
        if lines.len() != 7 || !lines[6].is_empty() {
            return Err(malformed("expected six lines"));
        }
        if !lines[4].is_empty() {
            return Err(malformed("missing blank line before signature"));
        }

        let origin = lines[0].to_string();
        if origin.is_empty() {
            return Err(malformed("empty origin"));
        }
        let tree_size: u64 = lines[1]
            .parse()
            .map_err(|_| malformed("tree size is not a number"))?;
        let root = decode_root(lines[2])?;
        let timestamp_ms: i64 = lines[3]
            .parse()
            .map_err(|_| malformed("timestamp is not a number"))?;

        let sig_line = lines[5]
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or_else(|| malformed("signature line must start with an em dash"))?;
        let (sig_origin, sig_b64) = sig_line
            .rsplit_once(' ')
            .ok_or_else(|| malformed("signature line missing signature"))?;
        if sig_origin != origin {
            return Err(malformed("signature line names a different origin"));
        }
        let signature = BASE64
            .decode(sig_b64)
            .map_err(|_| malformed("signature is not valid base64"))?;
        if signature.len() != 64 {
            return Err(malformed("signature must be 64 bytes"));
        }

        Ok(Self {
            origin,
            tree_size,
            root,
            timestamp_ms,
            signature,
        })
    }

    /// Verify the signature against the canonical payload.
    ///
    /// Returns `false` on any cryptographic mismatch; the checkpoint must
    /// already be structurally valid.
    pub fn verify(&self, key: &VerifyingKey) -> bool {
        let payload =
            Self::signed_payload(&self.origin, self.tree_size, &self.root, self.timestamp_ms);
        match Signature::from_slice(&self.signature) {
            Ok(signature) => key.verify(payload.as_bytes(), &signature).is_ok(),
            Err(_) => false,
        }
    }
}

/// Root hash: canonical 64-char lowercase hex, or base64 for backward
/// compatibility. Must decode to exactly 32 bytes.
fn decode_root(s: &str) -> Result<Hash, TlogError> {
    let malformed = |what: String| TlogError::MalformedCheckpoint(what);

    let bytes = if s.len() == HASH_SIZE * 2 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        hex::decode(s).map_err(|e| malformed(format!("root hex: {}", e)))?
    } else {
        BASE64
            .decode(s)
            .map_err(|_| malformed("root is neither lowercase hex nor base64".to_string()))?
    };
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| malformed(format!("root is {} bytes, expected {}", bytes.len(), HASH_SIZE)))
}

/// Produces checkpoints for the local log with the service key.
#[derive(Clone)]
pub struct CheckpointSigner {
    key: SigningKey,
    origin: String,
}

impl CheckpointSigner {
    /// Create a signer. The origin must be a URL and identifies the log
    /// in every note it signs.
    pub fn new(key: SigningKey, origin: &str) -> Result<Self, TlogError> {
        if !origin.starts_with("http://") && !origin.starts_with("https://") {
            return Err(TlogError::MalformedCheckpoint(format!(
                "origin is not a URL: {}",
                origin
            )));
        }
        Ok(Self {
            key,
            origin: origin.to_string(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Sign a checkpoint for the given tree size and root.
    pub fn create(&self, tree_size: u64, root: Hash) -> Result<Checkpoint, TlogError> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let payload = Checkpoint::signed_payload(&self.origin, tree_size, &root, timestamp_ms);
        let signature: Signature = self.key.sign(payload.as_bytes());
        Ok(Checkpoint {
            origin: self.origin.clone(),
            tree_size,
            root,
            timestamp_ms,
            signature: signature.to_bytes().to_vec(),
        })
    }
}
