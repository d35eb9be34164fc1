//! Resolve file references into local working files.
//!
//! Stored files are copied straight out of the blob store. Remote files are
//! fetched from their URL, uploaded under an owner-scoped key and promoted
//! with a compare-and-swap on the file record; the losing side of a
//! concurrent promotion drops its upload and uses the winner's blob.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use mforge_models::{FileId, FileRecord};
use mforge_storage::{upload_key, BlobStore};
use mforge_store::FileRepository;

use crate::error::{WorkerError, WorkerResult};

/// Downloads the bytes behind a remote file URL.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Write the content of `url` to `dest`, returning the byte count.
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> WorkerResult<u64>;
}

/// HTTP(S) fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn stream_to_file(&self, url: reqwest::Url, dest: &Path) -> WorkerResult<u64> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> WorkerResult<u64> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| WorkerError::validation(format!("Invalid remote URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(WorkerError::validation(format!(
                "Unsupported remote URL scheme: {}",
                parsed.scheme()
            )));
        }

        let result = self.stream_to_file(parsed, dest).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }
}

/// Turns file ids into local files inside an attempt's working directory.
pub struct Materializer {
    files: Arc<dyn FileRepository>,
    blobs: Arc<dyn BlobStore>,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl Materializer {
    pub fn new(files: Arc<dyn FileRepository>, blobs: Arc<dyn BlobStore>, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self { files, blobs, fetcher }
    }

    /// Look up a file record and check it belongs to `owner_id`.
    pub async fn resolve(&self, owner_id: &str, id: FileId) -> WorkerResult<FileRecord> {
        let record = self.files.get_file(id).await?;
        if record.owner_id != owner_id {
            return Err(WorkerError::validation(format!(
                "File {} does not belong to the task owner",
                id
            )));
        }
        Ok(record)
    }

    /// Copy a file into `dir`, promoting it first if it is still remote.
    ///
    /// On error nothing is left behind in `dir`.
    pub async fn materialize(&self, record: &FileRecord, dir: &Path) -> WorkerResult<PathBuf> {
        let path = dir.join(format!(
            "input_{}_{}.{}",
            record.id,
            uuid::Uuid::new_v4().simple(),
            record.extension()
        ));

        let result = if record.is_remote {
            self.promote(record, &path).await
        } else {
            self.download(&record.storage_pointer, &path).await
        };

        match result {
            Ok(()) => Ok(path),
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }

    async fn download(&self, key: &str, path: &Path) -> WorkerResult<()> {
        let bytes = self.blobs.get_to_file(key, path).await?;
        debug!(key = %key, bytes, "Materialized stored file");
        Ok(())
    }

    async fn promote(&self, record: &FileRecord, path: &Path) -> WorkerResult<()> {
        let remote_url = record.storage_pointer.as_str();
        let size = self.fetcher.fetch_to_file(remote_url, path).await?;

        let key = upload_key(&record.owner_id, &record.extension());
        self.blobs.put_file(path, &key, &record.content_type).await?;

        let promoted = match self.files.promote_remote(record.id, remote_url, &key, size).await {
            Ok(promoted) => promoted,
            Err(e) => {
                self.delete_blob(&key).await;
                return Err(e.into());
            }
        };

        if promoted {
            info!(file_id = %record.id, key = %key, bytes = size, "Promoted remote file");
            return Ok(());
        }

        // Another attempt promoted the file first; use its blob.
        self.delete_blob(&key).await;
        let current = self.files.get_file(record.id).await?;
        if current.is_remote {
            debug!(file_id = %record.id, "Remote file repointed concurrently, keeping fetched copy");
            return Ok(());
        }
        info!(file_id = %record.id, key = %current.storage_pointer, "Remote file already promoted");
        self.download(&current.storage_pointer, path).await
    }

    async fn delete_blob(&self, key: &str) {
        if let Err(e) = self.blobs.delete(key).await {
            warn!(key = %key, "Failed to delete orphaned upload: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mforge_models::NewFile;
    use mforge_storage::MemoryBlobStore;
    use mforge_store::MemoryStore;

    /// Writes fixed bytes; optionally lets a competing attempt win the
    /// promotion while the download is in progress.
    struct FakeFetcher {
        body: &'static [u8],
        competitor: Option<(Arc<MemoryStore>, FileId, String)>,
    }

    #[async_trait]
    impl RemoteFetcher for FakeFetcher {
        async fn fetch_to_file(&self, url: &str, dest: &Path) -> WorkerResult<u64> {
            if let Some((store, id, key)) = &self.competitor {
                assert!(store.promote_remote(*id, url, key, 6).await.unwrap());
            }
            tokio::fs::write(dest, self.body).await?;
            Ok(self.body.len() as u64)
        }
    }

    fn fetcher(body: &'static [u8]) -> Arc<FakeFetcher> {
        Arc::new(FakeFetcher { body, competitor: None })
    }

    #[tokio::test]
    async fn test_stored_file_copied_from_blob_store() {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.insert("uploads/u1/a.mp4", b"video".to_vec(), "video/mp4").await;
        let record = store
            .create_file(NewFile::stored("u1", "uploads/u1/a.mp4", 5, "video/mp4"))
            .await
            .unwrap();

        let materializer = Materializer::new(store.clone(), blobs.clone(), fetcher(b""));
        let dir = tempfile::tempdir().unwrap();
        let resolved = materializer.resolve("u1", record.id).await.unwrap();
        let path = materializer.materialize(&resolved, dir.path()).await.unwrap();

        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"video");
        assert_eq!(blobs.get_count(), 1);
    }

    #[tokio::test]
    async fn test_foreign_file_rejected() {
        let store = Arc::new(MemoryStore::new());
        let record = store
            .create_file(NewFile::stored("someone-else", "uploads/x/a.mp4", 5, "video/mp4"))
            .await
            .unwrap();
        let materializer = Materializer::new(store, Arc::new(MemoryBlobStore::new()), fetcher(b""));

        let err = materializer.resolve("u1", record.id).await.unwrap_err();
        assert!(matches!(err, WorkerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_remote_file_promoted_once() {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let record = store
            .create_file(NewFile::remote("u1", "https://cdn.example.com/clip.mp4", "video/mp4"))
            .await
            .unwrap();

        let materializer = Materializer::new(store.clone(), blobs.clone(), fetcher(b"remote"));
        let dir = tempfile::tempdir().unwrap();
        let path = materializer.materialize(&record, dir.path()).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"remote");
        let promoted = store.get_file(record.id).await.unwrap();
        assert!(!promoted.is_remote);
        assert_eq!(promoted.size, 6);
        assert!(promoted.storage_pointer.starts_with("uploads/u1/"));
        assert!(promoted.storage_pointer.ends_with(".mp4"));
        assert!(blobs.contains(&promoted.storage_pointer).await);
    }

    #[tokio::test]
    async fn test_losing_promotion_discards_its_upload() {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.insert("uploads/u1/winner.mp4", b"winner".to_vec(), "video/mp4").await;
        let record = store
            .create_file(NewFile::remote("u1", "https://cdn.example.com/clip.mp4", "video/mp4"))
            .await
            .unwrap();

        let racing = Arc::new(FakeFetcher {
            body: b"loser!",
            competitor: Some((store.clone(), record.id, "uploads/u1/winner.mp4".to_string())),
        });
        let materializer = Materializer::new(store.clone(), blobs.clone(), racing);
        let dir = tempfile::tempdir().unwrap();
        let path = materializer.materialize(&record, dir.path()).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"winner");
        assert_eq!(blobs.keys().await, vec!["uploads/u1/winner.mp4".to_string()]);
        assert_eq!(
            store.get_file(record.id).await.unwrap().storage_pointer,
            "uploads/u1/winner.mp4"
        );
    }

    #[tokio::test]
    async fn test_missing_blob_leaves_no_file() {
        let store = Arc::new(MemoryStore::new());
        let record = store
            .create_file(NewFile::stored("u1", "uploads/u1/gone.mp4", 5, "video/mp4"))
            .await
            .unwrap();
        let materializer = Materializer::new(store, Arc::new(MemoryBlobStore::new()), fetcher(b""));
        let dir = tempfile::tempdir().unwrap();

        let err = materializer.materialize(&record, dir.path()).await.unwrap_err();
        assert!(matches!(err, WorkerError::Validation(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
