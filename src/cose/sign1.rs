//! COSE_Sign1 Codec
//!
//! Encoding, decoding and ES256 signing of single-signer COSE structures
//! (RFC 9052 §4.2). Decoding accepts both the naked 4-element array and
//! CBOR tag 18; encoding always emits tag 18.
//!
//! Signatures travel in raw fixed-width `r || s` form (64 bytes). The
//! signing input is the canonical Sig_structure
//! `["Signature1", protected, external_aad, payload]`.

use ciborium::value::{Integer, Value};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};

use super::CoseError;

/// COSE algorithm identifier for ES256 (ECDSA P-256 + SHA-256)
pub const ALG_ES256: i64 = -7;

/// COSE algorithm identifier for SHA-256, used in hash envelopes
pub const HASH_ALG_SHA256: i64 = -16;

/// CBOR tag wrapping a COSE_Sign1 structure
const COSE_SIGN1_TAG: u64 = 18;

/// Protected header labels (integer keys)
pub mod label {
    pub const ALG: i64 = 1;
    pub const CTY: i64 = 3;
    pub const KID: i64 = 4;
    pub const CWT_CLAIMS: i64 = 15;
    pub const TYP: i64 = 16;
    pub const PAYLOAD_HASH_ALG: i64 = 258;
    pub const PREIMAGE_CONTENT_TYPE: i64 = 259;
    pub const PAYLOAD_LOCATION: i64 = 260;
    /// SCITT-specific issuer label, accepted on ingest
    pub const ISSUER: i64 = 391;
    /// SCITT-specific subject label, accepted on ingest
    pub const SUBJECT: i64 = 392;
    pub const RECEIPTS: i64 = 394;
    pub const VDS: i64 = 395;
    pub const VDP: i64 = 396;
}

/// CWT claims map keys (RFC 8392)
pub mod cwt_key {
    pub const ISS: i64 = 1;
    pub const SUB: i64 = 2;
    pub const AUD: i64 = 3;
    pub const EXP: i64 = 4;
    pub const NBF: i64 = 5;
    pub const IAT: i64 = 6;
    pub const CTI: i64 = 7;
}

/// CWT claims set carried in protected header label 15 (RFC 9597)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CwtClaims {
    pub iss: Option<String>,
    pub sub: Option<String>,
    pub aud: Option<String>,
    pub exp: Option<i64>,
    pub nbf: Option<i64>,
    pub iat: Option<i64>,
    pub cti: Option<Vec<u8>>,
}

impl CwtClaims {
    fn to_value(&self) -> Value {
        let mut map = Vec::new();
        if let Some(iss) = &self.iss {
            map.push((int(cwt_key::ISS), Value::Text(iss.clone())));
        }
        if let Some(sub) = &self.sub {
            map.push((int(cwt_key::SUB), Value::Text(sub.clone())));
        }
        if let Some(aud) = &self.aud {
            map.push((int(cwt_key::AUD), Value::Text(aud.clone())));
        }
        if let Some(exp) = self.exp {
            map.push((int(cwt_key::EXP), int(exp)));
        }
        if let Some(nbf) = self.nbf {
            map.push((int(cwt_key::NBF), int(nbf)));
        }
        if let Some(iat) = self.iat {
            map.push((int(cwt_key::IAT), int(iat)));
        }
        if let Some(cti) = &self.cti {
            map.push((int(cwt_key::CTI), Value::Bytes(cti.clone())));
        }
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, CoseError> {
        let map = value
            .as_map()
            .ok_or_else(|| CoseError::Decode("CWT claims must be a map".to_string()))?;
        let mut claims = Self::default();
        for (key, value) in map {
            match as_i64(key) {
                Some(k) if k == cwt_key::ISS => claims.iss = as_text(value),
                Some(k) if k == cwt_key::SUB => claims.sub = as_text(value),
                Some(k) if k == cwt_key::AUD => claims.aud = as_text(value),
                Some(k) if k == cwt_key::EXP => claims.exp = as_i64(value),
                Some(k) if k == cwt_key::NBF => claims.nbf = as_i64(value),
                Some(k) if k == cwt_key::IAT => claims.iat = as_i64(value),
                Some(k) if k == cwt_key::CTI => claims.cti = as_bytes(value),
                _ => {}
            }
        }
        Ok(claims)
    }
}

/// Decoded view of the integer-keyed protected header map.
///
/// Unrecognised labels survive untouched because the raw protected bytes
/// are kept alongside this view in [`CoseSign1`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtectedHeader {
    pub alg: Option<i64>,
    pub cty: Option<String>,
    pub kid: Option<Vec<u8>>,
    pub cwt_claims: Option<CwtClaims>,
    pub typ: Option<String>,
    pub payload_hash_alg: Option<i64>,
    pub preimage_content_type: Option<String>,
    pub payload_location: Option<String>,
    /// Issuer from legacy label 391 (ingest only; emission uses CWT claims)
    pub issuer_391: Option<String>,
    /// Subject from legacy label 392 (ingest only; emission uses CWT claims)
    pub subject_392: Option<String>,
    /// Verifiable data structure identifier (label 395)
    pub vds: Option<i64>,
}

impl ProtectedHeader {
    /// Header for an ES256-signed structure
    pub fn es256() -> Self {
        Self {
            alg: Some(ALG_ES256),
            ..Default::default()
        }
    }

    /// Effective issuer: CWT claims take precedence over label 391
    pub fn issuer(&self) -> Option<&str> {
        self.cwt_claims
            .as_ref()
            .and_then(|claims| claims.iss.as_deref())
            .or(self.issuer_391.as_deref())
    }

    /// Effective subject: CWT claims take precedence over label 392
    pub fn subject(&self) -> Option<&str> {
        self.cwt_claims
            .as_ref()
            .and_then(|claims| claims.sub.as_deref())
            .or(self.subject_392.as_deref())
    }

    /// Serialise to CBOR map bytes, labels in ascending order.
    pub fn encode(&self) -> Result<Vec<u8>, CoseError> {
        let mut map = Vec::new();
        if let Some(alg) = self.alg {
            map.push((int(label::ALG), int(alg)));
        }
        if let Some(cty) = &self.cty {
            map.push((int(label::CTY), Value::Text(cty.clone())));
        }
        if let Some(kid) = &self.kid {
            map.push((int(label::KID), Value::Bytes(kid.clone())));
        }
        if let Some(claims) = &self.cwt_claims {
            map.push((int(label::CWT_CLAIMS), claims.to_value()));
        }
        if let Some(typ) = &self.typ {
            map.push((int(label::TYP), Value::Text(typ.clone())));
        }
        if let Some(alg) = self.payload_hash_alg {
            map.push((int(label::PAYLOAD_HASH_ALG), int(alg)));
        }
        if let Some(cty) = &self.preimage_content_type {
            map.push((int(label::PREIMAGE_CONTENT_TYPE), Value::Text(cty.clone())));
        }
        if let Some(location) = &self.payload_location {
            map.push((int(label::PAYLOAD_LOCATION), Value::Text(location.clone())));
        }
        if let Some(issuer) = &self.issuer_391 {
            map.push((int(label::ISSUER), Value::Text(issuer.clone())));
        }
        if let Some(subject) = &self.subject_392 {
            map.push((int(label::SUBJECT), Value::Text(subject.clone())));
        }
        if let Some(vds) = self.vds {
            map.push((int(label::VDS), int(vds)));
        }
        to_bytes(&Value::Map(map))
    }

    /// Parse from CBOR map bytes. An empty byte string is an empty header.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoseError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let value = from_bytes(bytes)?;
        let map = value
            .as_map()
            .ok_or_else(|| CoseError::Decode("protected header must be a map".to_string()))?;

        let mut header = Self::default();
        for (key, value) in map {
            match as_i64(key) {
                Some(k) if k == label::ALG => header.alg = as_i64(value),
                Some(k) if k == label::CTY => header.cty = as_text(value),
                Some(k) if k == label::KID => header.kid = as_bytes(value),
                Some(k) if k == label::CWT_CLAIMS => {
                    header.cwt_claims = Some(CwtClaims::from_value(value)?)
                }
                Some(k) if k == label::TYP => header.typ = as_text(value),
                Some(k) if k == label::PAYLOAD_HASH_ALG => header.payload_hash_alg = as_i64(value),
                Some(k) if k == label::PREIMAGE_CONTENT_TYPE => {
                    header.preimage_content_type = as_text(value)
                }
                Some(k) if k == label::PAYLOAD_LOCATION => header.payload_location = as_text(value),
                Some(k) if k == label::ISSUER => header.issuer_391 = as_text(value),
                Some(k) if k == label::SUBJECT => header.subject_392 = as_text(value),
                Some(k) if k == label::VDS => header.vds = as_i64(value),
                _ => {}
            }
        }
        Ok(header)
    }
}

/// A decoded COSE_Sign1 structure.
///
/// The protected header bytes are kept exactly as received so that
/// signature verification and re-emission are byte-faithful.
#[derive(Debug, Clone, PartialEq)]
pub struct CoseSign1 {
    pub protected_bytes: Vec<u8>,
    pub protected: ProtectedHeader,
    pub unprotected: Vec<(Value, Value)>,
    pub payload: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

/// Decode a COSE_Sign1 from bytes, accepting the naked 4-element array
/// and the tag-18 form.
pub fn decode_sign1(bytes: &[u8]) -> Result<CoseSign1, CoseError> {
    let value = from_bytes(bytes)?;
    let value = match value {
        Value::Tag(COSE_SIGN1_TAG, inner) => *inner,
        Value::Tag(tag, _) => {
            return Err(CoseError::Decode(format!("unexpected CBOR tag {}", tag)))
        }
        other => other,
    };
    let array = match value {
        Value::Array(array) => array,
        _ => return Err(CoseError::Decode("COSE_Sign1 must be an array".to_string())),
    };
    if array.len() != 4 {
        return Err(CoseError::Decode(format!(
            "COSE_Sign1 must have 4 elements, got {}",
            array.len()
        )));
    }

    let protected_bytes = as_bytes(&array[0])
        .ok_or_else(|| CoseError::Decode("protected header must be a byte string".to_string()))?;
    let unprotected = array[1]
        .as_map()
        .ok_or_else(|| CoseError::Decode("unprotected header must be a map".to_string()))?
        .clone();
    let payload = match &array[2] {
        Value::Null => None,
        Value::Bytes(bytes) => Some(bytes.clone()),
        _ => {
            return Err(CoseError::Decode(
                "payload must be a byte string or nil".to_string(),
            ))
        }
    };
    let signature = as_bytes(&array[3])
        .ok_or_else(|| CoseError::Decode("signature must be a byte string".to_string()))?;

    let protected = ProtectedHeader::decode(&protected_bytes)?;
    Ok(CoseSign1 {
        protected_bytes,
        protected,
        unprotected,
        payload,
        signature,
    })
}

/// Encode a COSE_Sign1 with CBOR tag 18.
pub fn encode_sign1(sign1: &CoseSign1) -> Result<Vec<u8>, CoseError> {
    let payload = match &sign1.payload {
        Some(bytes) => Value::Bytes(bytes.clone()),
        None => Value::Null,
    };
    let value = Value::Tag(
        COSE_SIGN1_TAG,
        Box::new(Value::Array(vec![
            Value::Bytes(sign1.protected_bytes.clone()),
            Value::Map(sign1.unprotected.clone()),
            payload,
            Value::Bytes(sign1.signature.clone()),
        ])),
    );
    to_bytes(&value)
}

/// The canonical signing input:
/// `["Signature1", body_protected, external_aad, payload]`
fn sig_structure(protected_bytes: &[u8], payload: &[u8]) -> Result<Vec<u8>, CoseError> {
    to_bytes(&Value::Array(vec![
        Value::Text("Signature1".to_string()),
        Value::Bytes(protected_bytes.to_vec()),
        Value::Bytes(Vec::new()),
        Value::Bytes(payload.to_vec()),
    ]))
}

/// Build and sign a COSE_Sign1 over an attached payload with ES256.
pub fn sign1_create(
    protected: ProtectedHeader,
    payload: Vec<u8>,
    key: &SigningKey,
) -> Result<CoseSign1, CoseError> {
    if let Some(alg) = protected.alg {
        if alg != ALG_ES256 {
            return Err(CoseError::UnsupportedAlgorithm(alg));
        }
    }
    let protected_bytes = protected.encode()?;
    let message = sig_structure(&protected_bytes, &payload)?;
    let signature: Signature = key.sign(&message);

    Ok(CoseSign1 {
        protected_bytes,
        protected,
        unprotected: Vec::new(),
        payload: Some(payload),
        signature: signature.to_bytes().to_vec(),
    })
}

/// Verify a COSE_Sign1 signature.
///
/// For a detached payload (nil in the structure), the external payload
/// must be supplied. Returns `Ok(false)` on signature mismatch; errors
/// are reserved for structural problems.
pub fn sign1_verify(
    sign1: &CoseSign1,
    key: &VerifyingKey,
    ext_payload: Option<&[u8]>,
) -> Result<bool, CoseError> {
    if let Some(alg) = sign1.protected.alg {
        if alg != ALG_ES256 {
            return Err(CoseError::UnsupportedAlgorithm(alg));
        }
    }
    let payload = match (&sign1.payload, ext_payload) {
        (Some(attached), _) => attached.as_slice(),
        (None, Some(external)) => external,
        (None, None) => return Err(CoseError::MissingHeader("payload".to_string())),
    };
    if sign1.signature.len() != 64 {
        return Err(CoseError::Signature(format!(
            "ES256 signature must be 64 bytes, got {}",
            sign1.signature.len()
        )));
    }

    let message = sig_structure(&sign1.protected_bytes, payload)?;
    match Signature::from_slice(&sign1.signature) {
        Ok(signature) => Ok(key.verify(&message, &signature).is_ok()),
        Err(_) => Ok(false),
    }
}

fn int(value: i64) -> Value {
    Value::Integer(Integer::from(value))
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(integer) => i64::try_from(*integer).ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    value.as_text().map(str::to_string)
}

fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    value.as_bytes().cloned()
}

fn to_bytes(value: &Value) -> Result<Vec<u8>, CoseError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(|e| CoseError::Encode(e.to_string()))?;
    Ok(bytes)
}

fn from_bytes(bytes: &[u8]) -> Result<Value, CoseError> {
    ciborium::de::from_reader(bytes).map_err(|e| CoseError::Decode(e.to_string()))
}
