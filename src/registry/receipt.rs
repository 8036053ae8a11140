//! Receipt Synthesis
//!
//! A receipt proves that a registered statement is included in the log:
//! the leaf index, the tree size the proof was computed at, the inclusion
//! path, and the root it reconstructs. Receipts are served as COSE_Sign1
//! structures signed by the service key; the registration response also
//! carries the same fields as JSON.

use ciborium::value::{Integer, Value};
use serde::{Deserialize, Serialize};

use crate::cose::sign1::{encode_sign1, sign1_create, CwtClaims, ProtectedHeader};
use crate::cose::{CoseError, ServiceKey};
use crate::tlog::Hash;

/// Verifiable data structure identifier for an RFC 6962 log
/// (protected header label 395)
const VDS_RFC6962: i64 = 1;

/// CBOR payload keys of a COSE receipt
mod payload_key {
    pub const TREE_SIZE: i64 = 0;
    pub const LEAF_INDEX: i64 = 1;
    pub const INCLUSION_PATH: i64 = 2;
    pub const ROOT: i64 = 3;
    pub const TIMESTAMP: i64 = 4;
}

/// An inclusion receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Tree size the inclusion proof was generated at
    pub tree_size: u64,
    /// Position of the statement in the log
    pub leaf_index: u64,
    /// Sibling hashes, leaf to root, hex-encoded
    pub inclusion_proof: Vec<String>,
    /// Root hash the proof reconstructs (hex)
    pub root_hash: String,
}

impl Receipt {
    pub fn new(tree_size: u64, leaf_index: u64, proof: &[Hash], root: &Hash) -> Self {
        Self {
            tree_size,
            leaf_index,
            inclusion_proof: proof.iter().map(hex::encode).collect(),
            root_hash: hex::encode(root),
        }
    }

    /// Encode as a COSE_Sign1 signed by the service key.
    ///
    /// The payload is a CBOR map of the receipt fields; the protected
    /// headers carry the algorithm, the key thumbprint, CWT claims naming
    /// the log origin and entry, and the verifiable-data-structure label.
    pub fn to_cose(
        &self,
        key: &ServiceKey,
        origin: &str,
        timestamp_ms: i64,
    ) -> Result<Vec<u8>, CoseError> {
        let path: Result<Vec<Value>, CoseError> = self
            .inclusion_proof
            .iter()
            .map(|sibling| {
                hex::decode(sibling)
                    .map(Value::Bytes)
                    .map_err(|e| CoseError::Encode(format!("inclusion path hex: {}", e)))
            })
            .collect();
        let root = hex::decode(&self.root_hash)
            .map_err(|e| CoseError::Encode(format!("root hex: {}", e)))?;

        let payload = Value::Map(vec![
            (int(payload_key::TREE_SIZE), uint(self.tree_size)),
            (int(payload_key::LEAF_INDEX), uint(self.leaf_index)),
            (int(payload_key::INCLUSION_PATH), Value::Array(path?)),
            (int(payload_key::ROOT), Value::Bytes(root)),
            (int(payload_key::TIMESTAMP), int(timestamp_ms)),
        ]);
        let mut payload_bytes = Vec::new();
        ciborium::ser::into_writer(&payload, &mut payload_bytes)
            .map_err(|e| CoseError::Encode(e.to_string()))?;

        let mut protected = ProtectedHeader::es256();
        protected.kid = Some(key.kid().as_bytes().to_vec());
        protected.cwt_claims = Some(CwtClaims {
            iss: Some(origin.to_string()),
            sub: Some(self.leaf_index.to_string()),
            iat: Some(timestamp_ms / 1000),
            ..Default::default()
        });
        protected.vds = Some(VDS_RFC6962);

        let sign1 = sign1_create(protected, payload_bytes, key.signing_key())?;
        encode_sign1(&sign1)
    }
}

fn int(value: i64) -> Value {
    Value::Integer(Integer::from(value))
}

fn uint(value: u64) -> Value {
    Value::Integer(Integer::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cose::sign1::{decode_sign1, sign1_verify};
    use crate::tlog::{leaf_hash, node_hash};

    fn test_key() -> ServiceKey {
        ServiceKey::from_signing_key(p256::ecdsa::SigningKey::from_slice(&[9u8; 32]).unwrap())
    }

    fn sample_receipt() -> Receipt {
        let h2 = leaf_hash(&[2u8; 32]);
        let h3 = leaf_hash(&[3u8; 32]);
        let root = node_hash(&h2, &h3);
        Receipt::new(4, 2, &[h3], &root)
    }

    #[test]
    fn test_receipt_json_fields() {
        let receipt = sample_receipt();
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["tree_size"], 4);
        assert_eq!(json["leaf_index"], 2);
        assert_eq!(json["inclusion_proof"].as_array().unwrap().len(), 1);
        assert_eq!(json["root_hash"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_cose_receipt_verifies_under_service_key() {
        let key = test_key();
        let receipt = sample_receipt();
        let bytes = receipt
            .to_cose(&key, "https://transparency.example.com", 1_724_239_932_000)
            .unwrap();

        let sign1 = decode_sign1(&bytes).unwrap();
        assert!(sign1_verify(&sign1, key.verifying_key(), None).unwrap());
        assert_eq!(
            sign1.protected.issuer(),
            Some("https://transparency.example.com")
        );
        assert_eq!(sign1.protected.subject(), Some("2"));
        assert_eq!(sign1.protected.vds, Some(VDS_RFC6962));
        assert_eq!(
            sign1.protected.kid.as_deref(),
            Some(key.kid().as_bytes())
        );
    }

    #[test]
    fn test_cose_receipt_payload_contents() {
        let key = test_key();
        let receipt = sample_receipt();
        let bytes = receipt
            .to_cose(&key, "https://transparency.example.com", 1_724_239_932_000)
            .unwrap();
        let sign1 = decode_sign1(&bytes).unwrap();

        let payload: Value =
            ciborium::de::from_reader(sign1.payload.as_deref().unwrap()).unwrap();
        let map = payload.as_map().unwrap();
        let get = |label: i64| {
            map.iter()
                .find(|(k, _)| matches!(k, Value::Integer(i) if i64::try_from(*i) == Ok(label)))
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(get(payload_key::TREE_SIZE), uint(4));
        assert_eq!(get(payload_key::LEAF_INDEX), uint(2));
        let path = get(payload_key::INCLUSION_PATH);
        assert_eq!(path.as_array().unwrap().len(), 1);
        let root = get(payload_key::ROOT);
        assert_eq!(root.as_bytes().unwrap().len(), 32);
    }
}
