//! In-process blob store.
//!
//! Used by tests and local development runs. Keeps every object in memory
//! and counts operations so callers can assert on I/O that did or did not
//! happen.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::blob::{validate_key, BlobStore};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

/// Blob store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing the counters.
    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>, content_type: impl Into<String>) {
        self.objects.write().await.insert(
            key.into(),
            StoredObject {
                data: data.into(),
                content_type: content_type.into(),
            },
        );
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|o| o.content_type.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of `get` calls served (including `get_to_file`).
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `put`/`put_file` calls served.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn put(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String> {
        validate_key(key)?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.insert(key, data, content_type).await;
        Ok(key.to_string())
    }

    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<String> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", path.display(), e)))?;
        self.put(data, key, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        if !self.contains(key).await {
            return Err(StorageError::not_found(key));
        }
        Ok(format!("memory://{}?expires={}", key, expires_in.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryBlobStore::new();
        let key = store.put(b"abc".to_vec(), "a/b.bin", "application/octet-stream").await.unwrap();
        assert_eq!(key, "a/b.bin");
        assert_eq!(store.get("a/b.bin").await.unwrap(), b"abc");
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.get_count(), 1);

        store.delete("a/b.bin").await.unwrap();
        assert!(matches!(store.get("a/b.bin").await, Err(StorageError::NotFound(_))));
        // Deleting again is fine.
        store.delete("a/b.bin").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_to_file_and_put_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryBlobStore::new();
        store.insert("src.mp4", b"video".to_vec(), "video/mp4").await;

        let local = dir.path().join("nested").join("copy.mp4");
        let n = store.get_to_file("src.mp4", &local).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(tokio::fs::read(&local).await.unwrap(), b"video");

        store.put_file(&local, "dst.mp4", "video/mp4").await.unwrap();
        assert_eq!(store.content_type("dst.mp4").await.as_deref(), Some("video/mp4"));
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let store = MemoryBlobStore::new();
        let err = store.put(vec![1], "../escape", "x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
