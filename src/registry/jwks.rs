//! Issuer Key Discovery
//!
//! Resolves issuer verification keys from `<iss>/.well-known/jwks.json`.
//! Responses are cached with a TTL so repeated registrations from the
//! same issuer do not refetch the document.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use p256::ecdsa::VerifyingKey;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::common::error::ScittError;
use crate::cose::keys::verifying_key_from_jwk;

/// Default cache lifetime for a fetched JWK set
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// A JWK set document
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

/// A single JWK; only EC/P-256 keys are usable for ES256
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
}

impl Jwk {
    /// Convert to a verifying key, if this is a P-256 EC key
    pub fn verifying_key(&self) -> Result<VerifyingKey, ScittError> {
        if self.kty != "EC" || self.crv.as_deref() != Some("P-256") {
            return Err(ScittError::policy(format!(
                "unsupported key type {}/{}",
                self.kty,
                self.crv.as_deref().unwrap_or("?")
            )));
        }
        let x = self
            .x
            .as_deref()
            .ok_or_else(|| ScittError::malformed("JWK missing x coordinate"))?;
        let y = self
            .y
            .as_deref()
            .ok_or_else(|| ScittError::malformed("JWK missing y coordinate"))?;
        Ok(verifying_key_from_jwk(x, y)?)
    }
}

struct CachedSet {
    fetched_at: Instant,
    set: JwkSet,
}

/// TTL cache over issuer JWK sets
pub struct JwksCache {
    client: Client,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedSet>>,
}

impl JwksCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            client: Client::new(),
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch (or reuse) the JWK set for an issuer.
    pub async fn jwks(&self, issuer: &str) -> Result<JwkSet, ScittError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(issuer) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.set.clone());
                }
            }
        }

        let url = format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'));
        tracing::debug!(issuer, %url, "fetching issuer JWK set");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScittError::policy(format!("cannot reach issuer {}: {}", issuer, e)))?;
        if !response.status().is_success() {
            return Err(ScittError::policy(format!(
                "issuer {} returned HTTP {} for its JWK set",
                issuer,
                response.status()
            )));
        }
        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| ScittError::policy(format!("issuer {} JWK set: {}", issuer, e)))?;

        let mut cache = self.cache.write().await;
        cache.insert(
            issuer.to_string(),
            CachedSet {
                fetched_at: Instant::now(),
                set: set.clone(),
            },
        );
        Ok(set)
    }

    /// Resolve the verification keys for an issuer, preferring a `kid`
    /// match when the statement names one.
    pub async fn verification_keys(
        &self,
        issuer: &str,
        kid: Option<&[u8]>,
    ) -> Result<Vec<VerifyingKey>, ScittError> {
        let set = self.jwks(issuer).await?;
        let wanted = kid.map(|bytes| String::from_utf8_lossy(bytes).to_string());

        let candidates: Vec<&Jwk> = match &wanted {
            Some(kid) => {
                let matched: Vec<&Jwk> =
                    set.keys.iter().filter(|k| k.kid.as_ref() == Some(kid)).collect();
                if matched.is_empty() {
                    set.keys.iter().collect()
                } else {
                    matched
                }
            }
            None => set.keys.iter().collect(),
        };

        let keys: Vec<VerifyingKey> = candidates
            .into_iter()
            .filter_map(|jwk| jwk.verifying_key().ok())
            .collect();
        if keys.is_empty() {
            return Err(ScittError::signature(format!(
                "no usable ES256 key found for issuer {}",
                issuer
            )));
        }
        Ok(keys)
    }

    /// Seed the cache directly (tests and offline policies)
    pub async fn insert(&self, issuer: &str, set: JwkSet) {
        let mut cache = self.cache.write().await;
        cache.insert(
            issuer.to_string(),
            CachedSet {
                fetched_at: Instant::now(),
                set,
            },
        );
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cose::ServiceKey;

    fn jwk_for(key: &ServiceKey) -> Jwk {
        let value = key.public_jwk();
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_seeded_cache_resolves_keys() {
        let key = ServiceKey::from_signing_key(
            p256::ecdsa::SigningKey::from_slice(&[5u8; 32]).unwrap(),
        );
        let cache = JwksCache::new();
        cache
            .insert(
                "https://issuer.example.com",
                JwkSet {
                    keys: vec![jwk_for(&key)],
                },
            )
            .await;

        let keys = cache
            .verification_keys("https://issuer.example.com", None)
            .await
            .unwrap();
        assert_eq!(keys, vec![*key.verifying_key()]);

        // kid match narrows the candidates
        let keys = cache
            .verification_keys("https://issuer.example.com", Some(key.kid().as_bytes()))
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn test_non_ec_keys_are_skipped() {
        let cache = JwksCache::new();
        cache
            .insert(
                "https://issuer.example.com",
                JwkSet {
                    keys: vec![Jwk {
                        kty: "RSA".to_string(),
                        crv: None,
                        x: None,
                        y: None,
                        kid: None,
                        alg: Some("RS256".to_string()),
                    }],
                },
            )
            .await;

        let result = cache
            .verification_keys("https://issuer.example.com", None)
            .await;
        assert!(matches!(result, Err(ScittError::SignatureInvalid(_))));
    }
}
