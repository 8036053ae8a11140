//! Object Store Trait Definitions
//!
//! Defines the abstract byte store the tile log persists into.
//! Implementations: local filesystem (production), in-memory (testing),
//! S3-compatible (production, remote).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Storage errors, shared by object and metadata stores
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Transient errors worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Connection(_) | StorageError::Io(_) | StorageError::Database(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Byte-addressable content store keyed by path string.
///
/// Implementations:
/// - `FsObjectStore` - local filesystem, temp-file + rename atomic puts
/// - `MemoryObjectStore` - in-memory, for testing
/// - `S3ObjectStore` - S3-compatible HTTP API
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key, overwriting any previous value.
    ///
    /// Writes are atomically visible: readers observe either the old value
    /// or the complete new value, never a partial write.
    async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Fetch the bytes under a key, or `None` if absent.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// List all keys with the given prefix, in lexicographic order.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Retry decorator applying exponential backoff to transient failures.
///
/// Retries stay inside the storage component; callers only ever see the
/// final outcome.
pub struct RetryingStore<S> {
    inner: S,
    max_attempts: u32,
    base_delay: Duration,
}

impl<S: ObjectStore> RetryingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            max_attempts: 4,
            base_delay: Duration::from_millis(50),
        }
    }

    async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(self.base_delay * 2u32.saturating_pow(attempt)).await;
    }
}

macro_rules! retried {
    ($self:ident, $call:expr) => {{
        let mut attempt = 0;
        loop {
            match $call {
                Err(e) if e.is_retryable() && attempt + 1 < $self.max_attempts => {
                    tracing::warn!(attempt, error = %e, "object store operation failed, retrying");
                    $self.backoff(attempt).await;
                    attempt += 1;
                }
                other => break other,
            }
        }
    }};
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for RetryingStore<S> {
    async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        retried!(self, self.inner.put(key, bytes).await)
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        retried!(self, self.inner.get(key).await)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        retried!(self, self.inner.exists(key).await)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        retried!(self, self.inner.list(prefix).await)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        retried!(self, self.inner.delete(key).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store that fails a fixed number of times before succeeding
    struct FlakyStore {
        failures: AtomicU32,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn put(&self, _key: &str, _bytes: &[u8]) -> StorageResult<()> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                (f > 0).then(|| f - 1)
            }).is_ok()
            {
                return Err(StorageError::Io("transient".to_string()));
            }
            Ok(())
        }

        async fn get(&self, _key: &str) -> StorageResult<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn list(&self, _prefix: &str) -> StorageResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn delete(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let store = RetryingStore::new(FlakyStore {
            failures: AtomicU32::new(2),
        });
        store.put("tile/entries/000", b"x").await.unwrap();
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StorageError::Io("disk".into()).is_retryable());
        assert!(StorageError::Connection("refused".into()).is_retryable());
        assert!(!StorageError::NotFound("k".into()).is_retryable());
        assert!(!StorageError::InvalidData("bad".into()).is_retryable());
    }
}
