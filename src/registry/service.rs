//! Registration Pipeline
//!
//! Takes submitted COSE_Sign1 bytes through decode, policy checks, leaf
//! hashing, the log append, metadata recording, and receipt synthesis.
//!
//! Registration is idempotent from the client's perspective: resubmitting
//! the same statement bytes yields a conflict carrying the original entry
//! id and a freshly computed receipt, never a second log entry.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::jwks::JwksCache;
use super::receipt::Receipt;
use crate::common::error::{Result, ScittError};
use crate::cose::sign1::{decode_sign1, sign1_verify, CoseSign1};
use crate::cose::ServiceKey;
use crate::storage::{MetadataStore, StorageError};
use crate::tlog::{leaf_hash, TileLog};
use crate::types::{ReceiptRecord, StatementRecord};

/// Outcome of a registration attempt
#[derive(Debug, Clone)]
pub enum RegistrationOutcome {
    /// A new entry was appended
    Created(RegistrationResponse),
    /// The statement was already registered; nothing was appended
    Conflict(RegistrationResponse),
}

/// What the client gets back either way
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistrationResponse {
    pub entry_id: u64,
    pub statement_hash: String,
    pub receipt: Receipt,
}

/// The registration service
pub struct RegistrationService {
    log: Arc<TileLog>,
    meta: Arc<dyn MetadataStore>,
    key: Arc<ServiceKey>,
    origin: String,
    verify_signatures: bool,
    jwks: JwksCache,
    /// Serialises the duplicate check with the append so concurrent
    /// submissions of the same statement cannot both pass the check.
    write_lock: Mutex<()>,
}

impl RegistrationService {
    pub fn new(
        log: Arc<TileLog>,
        meta: Arc<dyn MetadataStore>,
        key: Arc<ServiceKey>,
        origin: String,
        verify_signatures: bool,
    ) -> Self {
        Self {
            log,
            meta,
            key,
            origin,
            verify_signatures,
            jwks: JwksCache::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Seed the issuer key cache (tests and offline policies)
    pub async fn seed_issuer_keys(&self, issuer: &str, set: super::jwks::JwkSet) {
        self.jwks.insert(issuer, set).await;
    }

    /// Register submitted COSE_Sign1 bytes.
    pub async fn register(&self, bytes: &[u8]) -> Result<RegistrationOutcome> {
        let sign1 = decode_sign1(bytes)?;

        if self.verify_signatures {
            self.verify_issuer_signature(&sign1).await?;
        }

        let statement_hash = hex::encode(Sha256::digest(bytes));
        let leaf = leaf_hash(bytes);

        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.meta.statement_by_hash(&statement_hash).await? {
            tracing::info!(
                entry_id = existing.entry_id,
                %statement_hash,
                "duplicate registration"
            );
            let receipt = self.build_receipt(existing.entry_id).await?;
            return Ok(RegistrationOutcome::Conflict(RegistrationResponse {
                entry_id: existing.entry_id,
                statement_hash,
                receipt,
            }));
        }

        let record = record_from_statement(&sign1, statement_hash.clone(), bytes.to_vec());
        let entry_id = match self.log.append_entry(leaf, Some(record)).await {
            Ok(entry_id) => entry_id,
            // The metadata transaction is the arbiter of uniqueness
            Err(crate::tlog::TlogError::Storage(StorageError::Duplicate(_))) => {
                let existing = self
                    .meta
                    .statement_by_hash(&statement_hash)
                    .await?
                    .ok_or_else(|| ScittError::internal("duplicate without a stored statement"))?;
                let receipt = self.build_receipt(existing.entry_id).await?;
                return Ok(RegistrationOutcome::Conflict(RegistrationResponse {
                    entry_id: existing.entry_id,
                    statement_hash,
                    receipt,
                }));
            }
            Err(e) => return Err(e.into()),
        };

        let receipt = self.build_receipt(entry_id).await?;
        self.meta
            .insert_receipt(&ReceiptRecord {
                entry_id,
                tree_size: receipt.tree_size,
                issued_at: chrono::Utc::now().timestamp_millis(),
            })
            .await?;

        tracing::info!(entry_id, %statement_hash, "statement registered");
        Ok(RegistrationOutcome::Created(RegistrationResponse {
            entry_id,
            statement_hash,
            receipt,
        }))
    }

    /// Receipt for an entry, with the inclusion proof computed at the
    /// current tree size.
    pub async fn receipt_for(&self, entry_id: u64) -> Result<Receipt> {
        if self.meta.statement_by_id(entry_id).await?.is_none() {
            return Err(ScittError::not_found(format!("entry {}", entry_id)));
        }
        self.build_receipt(entry_id).await
    }

    /// COSE-encoded receipt bytes, as served by `GET /entries/{id}`
    pub async fn receipt_cose(&self, entry_id: u64) -> Result<Vec<u8>> {
        let receipt = self.receipt_for(entry_id).await?;
        let bytes = receipt.to_cose(
            &self.key,
            &self.origin,
            chrono::Utc::now().timestamp_millis(),
        )?;
        Ok(bytes)
    }

    async fn build_receipt(&self, entry_id: u64) -> Result<Receipt> {
        let tree_size = self.log.size().await;
        let proof = self.log.inclusion_proof(entry_id, tree_size).await?;
        let root = self.log.root().await?;
        Ok(Receipt::new(tree_size, entry_id, &proof, &root))
    }

    /// Verify the issuer signature using keys discovered from the CWT
    /// `iss` claim.
    async fn verify_issuer_signature(&self, sign1: &CoseSign1) -> Result<()> {
        let issuer = sign1
            .protected
            .issuer()
            .ok_or_else(|| ScittError::policy("statement carries no issuer claim"))?
            .to_string();
        let keys = self
            .jwks
            .verification_keys(&issuer, sign1.protected.kid.as_deref())
            .await?;

        for key in &keys {
            if sign1_verify(sign1, key, None)? {
                return Ok(());
            }
        }
        Err(ScittError::signature(format!(
            "statement signature does not verify under any key of {}",
            issuer
        )))
    }
}

/// Extract the metadata row from a decoded statement.
fn record_from_statement(
    sign1: &CoseSign1,
    statement_hash: String,
    bytes: Vec<u8>,
) -> StatementRecord {
    let mut record = StatementRecord::new(statement_hash, bytes);
    record.iss = sign1.protected.issuer().map(str::to_string);
    record.sub = sign1.protected.subject().map(str::to_string);
    record.cty = sign1.protected.cty.clone();
    record.typ = sign1.protected.typ.clone();
    record.payload_hash_alg = sign1.protected.payload_hash_alg;
    if sign1.protected.payload_hash_alg.is_some() {
        record.payload_hash = sign1.payload.as_deref().map(hex::encode);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cose::sign1::{sign1_create, CwtClaims, ProtectedHeader};
    use crate::cose::{encode_sign1, EnvelopeOptions};
    use crate::registry::jwks::JwkSet;
    use crate::storage::{MemoryObjectStore, SqliteMetadataStore};
    use crate::tlog::{verify_inclusion, CheckpointSigner};

    const ORIGIN: &str = "https://transparency.example.com";

    fn issuer_key() -> p256::ecdsa::SigningKey {
        p256::ecdsa::SigningKey::from_slice(&[21u8; 32]).unwrap()
    }

    async fn service(verify_signatures: bool) -> RegistrationService {
        let store = Arc::new(MemoryObjectStore::new());
        let meta: Arc<SqliteMetadataStore> = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let key = Arc::new(ServiceKey::from_signing_key(
            p256::ecdsa::SigningKey::from_slice(&[8u8; 32]).unwrap(),
        ));
        let signer = CheckpointSigner::new(key.signing_key().clone(), ORIGIN).unwrap();
        let log = Arc::new(TileLog::open(store, meta.clone(), signer).await.unwrap());
        RegistrationService::new(log, meta, key, ORIGIN.to_string(), verify_signatures)
    }

    fn statement(subject: &str) -> Vec<u8> {
        let mut protected = ProtectedHeader::es256();
        protected.cwt_claims = Some(CwtClaims {
            iss: Some("https://issuer.example.com".to_string()),
            sub: Some(subject.to_string()),
            ..Default::default()
        });
        let sign1 = sign1_create(protected, b"payload".to_vec(), &issuer_key()).unwrap();
        encode_sign1(&sign1).unwrap()
    }

    #[tokio::test]
    async fn test_first_registration_creates_entry_zero() {
        let service = service(false).await;
        let bytes = statement("artifact-0");

        let outcome = service.register(&bytes).await.unwrap();
        let response = match outcome {
            RegistrationOutcome::Created(response) => response,
            RegistrationOutcome::Conflict(_) => panic!("expected creation"),
        };
        assert_eq!(response.entry_id, 0);
        assert_eq!(response.receipt.tree_size, 1);
        assert!(response.receipt.inclusion_proof.is_empty());

        // The receipt proof verifies against the log root
        let root = service.log.root().await.unwrap();
        assert!(verify_inclusion(0, 1, &leaf_hash(&bytes), &[], &root).unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_idempotent() {
        let service = service(false).await;
        let bytes = statement("artifact-0");

        let first = service.register(&bytes).await.unwrap();
        let first = match first {
            RegistrationOutcome::Created(response) => response,
            RegistrationOutcome::Conflict(_) => panic!("expected creation"),
        };

        // A second, different statement grows the log in between
        service.register(&statement("artifact-1")).await.unwrap();

        let second = service.register(&bytes).await.unwrap();
        let second = match second {
            RegistrationOutcome::Conflict(response) => response,
            RegistrationOutcome::Created(_) => panic!("expected conflict"),
        };
        assert_eq!(second.entry_id, first.entry_id);
        // Receipt is recomputed at the current size, not replayed
        assert_eq!(second.receipt.tree_size, 2);
        assert_eq!(service.log.size().await, 2);
    }

    #[tokio::test]
    async fn test_malformed_bytes_rejected() {
        let service = service(false).await;
        let result = service.register(b"not cbor at all").await;
        assert!(result.is_err());
        assert_eq!(service.log.size().await, 0);
    }

    #[tokio::test]
    async fn test_metadata_extraction() {
        let service = service(false).await;
        let bytes = statement("pkg:npm/left-pad");
        service.register(&bytes).await.unwrap();

        let record = service.meta.statement_by_id(0).await.unwrap().unwrap();
        assert_eq!(record.iss.as_deref(), Some("https://issuer.example.com"));
        assert_eq!(record.sub.as_deref(), Some("pkg:npm/left-pad"));
        assert_eq!(record.entry_tile_key, "tile/entries/000");
        assert_eq!(record.entry_tile_offset, 0);
        assert_eq!(record.statement, bytes);
    }

    #[tokio::test]
    async fn test_receipt_for_unknown_entry_is_not_found() {
        let service = service(false).await;
        let result = service.receipt_for(5).await;
        assert!(matches!(result, Err(ScittError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_receipts_stay_valid_as_log_grows() {
        let service = service(false).await;
        service.register(&statement("a")).await.unwrap();
        for name in ["b", "c", "d", "e"] {
            service.register(&statement(name)).await.unwrap();
        }

        // Entry 0's receipt at the current size verifies under the
        // current root
        let receipt = service.receipt_for(0).await.unwrap();
        assert_eq!(receipt.tree_size, 5);
        let proof: Vec<[u8; 32]> = receipt
            .inclusion_proof
            .iter()
            .map(|h| hex::decode(h).unwrap().try_into().unwrap())
            .collect();
        let root = service.log.root().await.unwrap();
        assert!(verify_inclusion(0, 5, &leaf_hash(&statement("a")), &proof, &root).unwrap());
    }

    #[tokio::test]
    async fn test_policy_verification_accepts_valid_issuer_signature() {
        let service = service(true).await;
        let issuer = ServiceKey::from_signing_key(issuer_key());
        let jwk: super::super::jwks::Jwk =
            serde_json::from_value(issuer.public_jwk()).unwrap();
        service
            .seed_issuer_keys("https://issuer.example.com", JwkSet { keys: vec![jwk] })
            .await;

        let outcome = service.register(&statement("signed")).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_policy_verification_rejects_wrong_key() {
        let service = service(true).await;
        // Publish a different key than the one that signed
        let other = ServiceKey::from_signing_key(
            p256::ecdsa::SigningKey::from_slice(&[22u8; 32]).unwrap(),
        );
        let jwk: super::super::jwks::Jwk =
            serde_json::from_value(other.public_jwk()).unwrap();
        service
            .seed_issuer_keys("https://issuer.example.com", JwkSet { keys: vec![jwk] })
            .await;

        let result = service.register(&statement("signed")).await;
        assert!(matches!(result, Err(ScittError::SignatureInvalid(_))));
        assert_eq!(service.log.size().await, 0);
    }

    #[tokio::test]
    async fn test_policy_requires_issuer_claim() {
        let service = service(true).await;
        let sign1 =
            sign1_create(ProtectedHeader::es256(), b"payload".to_vec(), &issuer_key()).unwrap();
        let bytes = encode_sign1(&sign1).unwrap();

        let result = service.register(&bytes).await;
        assert!(matches!(result, Err(ScittError::Policy(_))));
    }

    #[tokio::test]
    async fn test_hash_envelope_metadata_recorded() {
        let service = service(false).await;
        let envelope = crate::cose::sign_envelope(
            b"artifact",
            &EnvelopeOptions {
                content_type: Some("application/spdx+json".to_string()),
                location: None,
            },
            &issuer_key(),
            Some(CwtClaims {
                iss: Some("https://issuer.example.com".to_string()),
                ..Default::default()
            }),
        )
        .unwrap();
        let bytes = encode_sign1(&envelope).unwrap();
        service.register(&bytes).await.unwrap();

        let record = service.meta.statement_by_id(0).await.unwrap().unwrap();
        assert_eq!(record.payload_hash_alg, Some(crate::cose::HASH_ALG_SHA256));
        assert_eq!(
            record.payload_hash.as_deref(),
            Some(hex::encode(Sha256::digest(b"artifact")).as_str())
        );
    }
}
