//! Blob store contract.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// Content storage used to materialize inputs and publish outputs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download an object's bytes.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Upload bytes under `key`, returning the key.
    async fn put(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String>;

    /// Upload a local file under `key`, returning the key.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<String>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Generate a temporary signed GET URL.
    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Download an object into a local file, returning the byte count.
    async fn get_to_file(&self, key: &str, path: &Path) -> StorageResult<u64> {
        let bytes = self.get(key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::download_failed(format!("Failed to create directory: {}", e)))?;
        }

        let len = bytes.len() as u64;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| StorageError::download_failed(format!("Failed to write file: {}", e)))?;
        Ok(len)
    }
}

/// Reject keys that are empty, absolute or contain traversal segments.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
