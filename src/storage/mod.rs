//! Storage Layer Module
//!
//! Persistence for tiles, checkpoints, and statement metadata.
//!
//! This module contains:
//! - Object store trait and backends (filesystem, memory, S3)
//! - SQLite metadata store holding the authoritative tree size
//! - A retry decorator applying exponential backoff to transient failures

pub mod fs;
pub mod memory;
pub mod metadata;
pub mod object;
pub mod s3;

use std::sync::Arc;

use crate::common::config::{StorageConfig, StorageKind};

// Re-exports for convenience
pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;
pub use metadata::{AppendCommit, MetadataStore, SqliteMetadataStore};
pub use object::{ObjectStore, RetryingStore, StorageError, StorageResult};
pub use s3::S3ObjectStore;

/// Build the configured object store backend, wrapped with retries.
pub fn build_object_store(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.kind {
        StorageKind::Local => {
            let path = config.path.as_deref().unwrap_or("data/tiles");
            Arc::new(RetryingStore::new(FsObjectStore::new(path)?))
        }
        StorageKind::Memory => Arc::new(MemoryObjectStore::new()),
        StorageKind::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| StorageError::InvalidData("missing s3 settings".to_string()))?;
            Arc::new(RetryingStore::new(S3ObjectStore::new(s3)))
        }
    };
    Ok(store)
}
