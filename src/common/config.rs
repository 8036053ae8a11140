//! Service Configuration
//!
//! Configuration is loaded from a JSON document and can be overridden by
//! environment variables for deployment ergonomics:
//!
//! - `SCITT_CONFIG` - path to the configuration file (default: `scittlog.json`)
//! - `SCITT_ORIGIN` - log origin URL
//! - `SCITT_HOST` / `SCITT_PORT` - listen address
//! - `SCITT_LOG_LEVEL` - logging level (debug, info, warn, error)
//!
//! Sensitive values (S3 credentials) may also come from the environment:
//! `SCITT_S3_ACCESS_KEY`, `SCITT_S3_SECRET_KEY`.

use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {0}: {1}")]
    Read(String, String),

    #[error("cannot parse config file: {0}")]
    Parse(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Object store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
    S3,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageKind::Local),
            "memory" => Ok(StorageKind::Memory),
            "s3" => Ok(StorageKind::S3),
            _ => Err(ConfigError::InvalidValue(
                "storage.type".to_string(),
                format!("unknown backend: {}", s),
            )),
        }
    }
}

/// S3-compatible backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_true")]
    pub use_ssl: bool,
    #[serde(default = "default_region")]
    pub region: String,
}

/// Object store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    /// Root directory for the `local` backend
    #[serde(default)]
    pub path: Option<String>,
    /// Settings for the `s3` backend
    #[serde(default)]
    pub s3: Option<S3Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Local,
            path: Some("data/tiles".to_string()),
            s3: None,
        }
    }
}

/// Metadata database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            enable_wal: true,
        }
    }
}

/// Service key file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Private key, PKCS#8 PEM
    #[serde(default = "default_private_key")]
    pub private: String,
    /// Public key, JWK JSON
    #[serde(default = "default_public_key")]
    pub public: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            private: default_private_key(),
            public: default_public_key(),
        }
    }
}

/// CORS settings for the HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Empty list means "any origin"
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: Vec::new(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: CorsConfig::default(),
        }
    }
}

/// Registration policy knobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Verify issuer signatures against keys discovered from CWT `iss`
    #[serde(default)]
    pub verify_signatures: bool,
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Log origin, e.g. `https://transparency.example.com`
    pub origin: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub keys: KeysConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub registration_policy: PolicyConfig,

    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub log_json: bool,
}

impl ServiceConfig {
    /// Load configuration from a JSON file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::Read(path.as_ref().display().to_string(), e.to_string())
        })?;
        let mut config: ServiceConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-variable overrides on top of the file values.
    pub fn apply_env(&mut self) {
        if let Ok(origin) = env::var("SCITT_ORIGIN") {
            self.origin = origin;
        }
        if let Ok(host) = env::var("SCITT_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("SCITT_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(level) = env::var("SCITT_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(s3) = self.storage.s3.as_mut() {
            if let Ok(key) = env::var("SCITT_S3_ACCESS_KEY") {
                s3.access_key = key;
            }
            if let Ok(key) = env::var("SCITT_S3_SECRET_KEY") {
                s3.secret_key = key;
            }
        }
    }

    /// Validate field values and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.origin.is_empty() {
            return Err(ConfigError::MissingField("origin".to_string()));
        }
        if !self.origin.starts_with("http://") && !self.origin.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "origin".to_string(),
                format!("not a URL: {}", self.origin),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue(
                "server.port".to_string(),
                "port must be in 1..65535".to_string(),
            ));
        }
        match self.storage.kind {
            StorageKind::Local => {
                if self.storage.path.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::MissingField("storage.path".to_string()));
                }
            }
            StorageKind::Memory => {}
            StorageKind::S3 => {
                let s3 = self
                    .storage
                    .s3
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingField("storage.s3".to_string()))?;
                if s3.endpoint.is_empty() {
                    return Err(ConfigError::MissingField("storage.s3.endpoint".to_string()));
                }
                if s3.bucket.is_empty() {
                    return Err(ConfigError::MissingField("storage.s3.bucket".to_string()));
                }
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_db_path() -> String {
    "data/scittlog.db".to_string()
}

fn default_private_key() -> String {
    "keys/service-key.pem".to_string()
}

fn default_public_key() -> String {
    "keys/service-key.jwk.json".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ServiceConfig {
        serde_json::from_str(r#"{"origin": "https://transparency.example.com"}"#).unwrap()
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = minimal();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.kind, StorageKind::Local);
        assert!(config.database.enable_wal);
        assert!(!config.registration_policy.verify_signatures);
        config.validate().unwrap();
    }

    #[test]
    fn test_origin_must_be_url() {
        let mut config = minimal();
        config.origin = "not-a-url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn test_port_zero_rejected() {
        let mut config = minimal();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_s3_requires_settings() {
        let mut config = minimal();
        config.storage.kind = StorageKind::S3;
        config.storage.s3 = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(_))
        ));

        config.storage.s3 = Some(S3Config {
            endpoint: "s3.example.com".to_string(),
            bucket: "tlog".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            use_ssl: true,
            region: default_region(),
        });
        config.validate().unwrap();
    }

    #[test]
    fn test_storage_kind_parsing() {
        assert!(matches!("local".parse(), Ok(StorageKind::Local)));
        assert!(matches!("s3".parse(), Ok(StorageKind::S3)));
        assert!("ceph".parse::<StorageKind>().is_err());
    }
}
