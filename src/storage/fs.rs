//! Local Filesystem Object Store
//!
//! Keys map to paths under a root directory. Writes go to a temporary
//! sibling file first and are renamed into place, so a key is never
//! observable in a half-written state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::object::{ObjectStore, StorageError, StorageResult};

/// Filesystem-backed object store
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> StorageResult<Self> {
        std::fs::create_dir_all(root.as_ref())
            .map_err(|e| StorageError::Io(format!("create {}: {}", root.as_ref().display(), e)))?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    /// Resolve a key to a path under the root, rejecting escapes.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidData("empty key".to_string()));
        }
        if key.starts_with('/') || key.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return Err(StorageError::InvalidData(format!("invalid key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = self.key_path(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidData(format!("invalid key: {}", key)))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::Io(format!("create {}: {}", parent.display(), e)))?;

        // Temp file in the same directory so the rename is atomic.
        let tmp = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageError::Io(format!("write {}: {}", tmp.display(), e)))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::Io(format!("rename to {}: {}", path.display(), e)));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.key_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(format!("read {}: {}", path.display(), e))),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(format!("stat {}: {}", path.display(), e))),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            walk(&root, &root, &mut keys)?;
            keys.retain(|k| k.starts_with(&prefix));
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| StorageError::Io(format!("list task: {}", e)))?
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(format!("delete {}: {}", path.display(), e))),
        }
    }
}

/// Collect relative key paths under `dir`, skipping temp files.
fn walk(root: &Path, dir: &Path, keys: &mut Vec<String>) -> StorageResult<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StorageError::Io(format!("read dir {}: {}", dir.display(), e))),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::Io(e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, keys)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.rsplit('/').next().unwrap_or("").starts_with(".tmp-") {
                keys.push(key);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, FsObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, store) = temp_store();
        store.put("tile/entries/000", b"hello").await.unwrap();
        let bytes = store.get("tile/entries/000").await.unwrap().unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (_dir, store) = temp_store();
        assert!(store.get("tile/0/000").await.unwrap().is_none());
        assert!(!store.exists("tile/0/000").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (_dir, store) = temp_store();
        store.put("k", b"one").await.unwrap();
        store.put("k", b"two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_filtered() {
        let (_dir, store) = temp_store();
        store.put("tile/0/001", b"b").await.unwrap();
        store.put("tile/0/000", b"a").await.unwrap();
        store.put("tile/entries/000", b"c").await.unwrap();

        let keys = store.list("tile/0/").await.unwrap();
        assert_eq!(keys, vec!["tile/0/000".to_string(), "tile/0/001".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store) = temp_store();
        store.put("k", b"v").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let (_dir, store) = temp_store();
        assert!(store.put("../escape", b"x").await.is_err());
        assert!(store.get("/absolute").await.is_err());
    }
}
