//! Common Infrastructure Module
//!
//! Shared utilities and configuration for the transparency service.
//!
//! This module contains:
//! - Configuration loading from a JSON file plus environment overrides
//! - Structured logging setup
//! - Common error types

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{
    ConfigError, CorsConfig, DatabaseConfig, KeysConfig, PolicyConfig, S3Config, ServerConfig,
    ServiceConfig, StorageConfig, StorageKind,
};
pub use error::{ErrorKind, Result, ScittError};
pub use logging::{init_logging, LogLevel, LoggingError};
