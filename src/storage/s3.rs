//! S3-Compatible Object Store
//!
//! Speaks the S3 REST API directly over the shared HTTP client: SigV4
//! request signing, path-style addressing, ListObjectsV2 paging. Works
//! against AWS S3 and compatible stores (MinIO, Ceph RGW).
//!
//! A put is a single `PutObject`, which S3 applies atomically, so readers
//! never observe partial writes.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use sha2::{Digest, Sha256};

use super::object::{ObjectStore, StorageError, StorageResult};
use crate::common::config::S3Config;

type HmacSha256 = Hmac<Sha256>;

const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// S3-backed object store
pub struct S3ObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    access_key: String,
    secret_key: String,
    region: String,
    scheme: &'static str,
}

impl S3ObjectStore {
    /// Create a store from configuration. The endpoint is `host[:port]`
    /// without a scheme.
    pub fn new(config: &S3Config) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            region: config.region.clone(),
            scheme: if config.use_ssl { "https" } else { "http" },
        }
    }

    fn url(&self, key: &str, query: &str) -> String {
        let mut url = format!(
            "{}://{}/{}/{}",
            self.scheme,
            self.endpoint,
            self.bucket,
            uri_encode(key, true)
        );
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Send a signed request and return the response.
    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, &str)],
        body: Vec<u8>,
    ) -> StorageResult<reqwest::Response> {
        let now = chrono::Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let datestamp = now.format("%Y%m%d").to_string();

        let payload_hash = hex::encode(Sha256::digest(&body));
        let canonical_uri = format!("/{}/{}", self.bucket, uri_encode(key, true));
        let canonical_query = canonical_query_string(query);

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_query,
            self.endpoint,
            payload_hash,
            amz_date,
            SIGNED_HEADERS,
            payload_hash
        );

        let scope = format!("{}/{}/s3/aws4_request", datestamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = derive_signing_key(&self.secret_key, &datestamp, &self.region);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, SIGNED_HEADERS, signature
        );

        let url = self.url(key, &canonical_query);
        self.client
            .request(method, url)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header("authorization", authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn fail(&self, op: &str, key: &str, resp: reqwest::Response) -> StorageError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        StorageError::Io(format!("{} {}: HTTP {}: {}", op, key, status, snippet))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let resp = self.send(Method::PUT, key, &[], bytes.to_vec()).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(self.fail("put", key, resp).await)
        }
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let resp = self.send(Method::GET, key, &[], Vec::new()).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| StorageError::Connection(e.to_string()))?;
                Ok(Some(bytes.to_vec()))
            }
            _ => Err(self.fail("get", key, resp).await),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let resp = self.send(Method::HEAD, key, &[], Vec::new()).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(self.fail("head", key, resp).await),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(tok) = token.as_deref() {
                query.push(("continuation-token", tok));
            }

            let resp = self.send(Method::GET, "", &query, Vec::new()).await?;
            if !resp.status().is_success() {
                return Err(self.fail("list", prefix, resp).await);
            }
            let body = resp
                .text()
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?;

            keys.extend(extract_tags(&body, "Key").into_iter().map(xml_unescape));

            if body.contains("<IsTruncated>true</IsTruncated>") {
                token = extract_tags(&body, "NextContinuationToken")
                    .into_iter()
                    .next()
                    .map(xml_unescape);
                if token.is_none() {
                    return Err(StorageError::InvalidData(
                        "truncated listing without continuation token".to_string(),
                    ));
                }
            } else {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let resp = self.send(Method::DELETE, key, &[], Vec::new()).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(self.fail("delete", key, resp).await),
        }
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// SigV4 key derivation chain: date -> region -> service -> aws4_request
fn derive_signing_key(secret: &str, datestamp: &str, region: &str) -> [u8; 32] {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), datestamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

/// Percent-encode per SigV4: unreserved characters pass through, `/` only
/// when `keep_slash` is set.
fn uri_encode(s: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Sorted, fully-encoded query string used both on the wire and in the
/// canonical request.
fn canonical_query_string(query: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k, false), uri_encode(v, false)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Pull the contents of every `<tag>...</tag>` out of an XML body.
fn extract_tags(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        match after.find(&close) {
            Some(end) => {
                out.push(after[..end].to_string());
                rest = &after[end + close.len()..];
            }
            None => break,
        }
    }
    out
}

fn xml_unescape(s: String) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
