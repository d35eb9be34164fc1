//! Result publication.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use mforge_models::{content_type_for_extension, FileId, NewFile, Task};
use mforge_storage::{output_key, BlobStore};
use mforge_store::FileRepository;

use crate::error::WorkerResult;

/// Uploads a final artifact and registers it as a file.
pub struct ResultPublisher {
    files: Arc<dyn FileRepository>,
    blobs: Arc<dyn BlobStore>,
}

impl ResultPublisher {
    pub fn new(files: Arc<dyn FileRepository>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { files, blobs }
    }

    /// Upload `path` under a task-scoped key and create its file record.
    ///
    /// If the record cannot be created the uploaded blob is removed again.
    pub async fn publish(&self, task: &Task, path: &Path) -> WorkerResult<FileId> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "mp4".to_string());
        let content_type = content_type_for_extension(&extension);
        let size = tokio::fs::metadata(path).await?.len();

        let key = output_key(&task.owner_id, task.id, &extension);
        self.blobs.put_file(path, &key, content_type).await?;

        let new = NewFile::stored(&task.owner_id, &key, size, content_type)
            .with_original_name(format!("{}_{}.{}", task.task_type, task.id, extension));
        match self.files.create_file(new).await {
            Ok(record) => {
                info!(task_id = %task.id, file_id = %record.id, key = %key, bytes = size, "Published result");
                Ok(record.id)
            }
            Err(e) => {
                if let Err(del) = self.blobs.delete(&key).await {
                    warn!(key = %key, "Failed to delete unregistered result: {}", del);
                }
                Err(e.into())
            }
        }
    }

    /// Remove a published result that no task will reference.
    ///
    /// Best effort: failures are logged and leave an orphan behind.
    pub async fn discard(&self, file_id: FileId) {
        let record = match self.files.get_file(file_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(file_id = %file_id, "Failed to look up discarded result: {}", e);
                return;
            }
        };
        if let Err(e) = self.blobs.delete(&record.storage_pointer).await {
            warn!(file_id = %file_id, key = %record.storage_pointer, "Failed to delete discarded result: {}", e);
            return;
        }
        if let Err(e) = self.files.delete_file(file_id).await {
            warn!(file_id = %file_id, "Failed to delete discarded file record: {}", e);
            return;
        }
        info!(file_id = %file_id, "Discarded unlinked result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mforge_models::{NewTask, TaskId, TaskType};
    use mforge_storage::MemoryBlobStore;
    use mforge_store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_uploads_and_registers() {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let publisher = ResultPublisher::new(store.clone(), blobs.clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.mp4");
        std::fs::write(&path, b"rendered").unwrap();
        let task = NewTask::new("u1", TaskType::Combined, json!({})).into_task(TaskId(4));

        let id = publisher.publish(&task, &path).await.unwrap();
        let record = store.get_file(id).await.unwrap();

        assert_eq!(record.owner_id, "u1");
        assert_eq!(record.size, 8);
        assert_eq!(record.content_type, "video/mp4");
        assert!(!record.is_remote);
        assert!(record.storage_pointer.starts_with("outputs/u1/4/"));
        assert!(blobs.contains(&record.storage_pointer).await);
    }

    #[tokio::test]
    async fn test_discard_removes_blob_and_record() {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let publisher = ResultPublisher::new(store.clone(), blobs.clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.mp4");
        std::fs::write(&path, b"rendered").unwrap();
        let task = NewTask::new("u1", TaskType::Combined, json!({})).into_task(TaskId(4));

        let id = publisher.publish(&task, &path).await.unwrap();
        let key = store.get_file(id).await.unwrap().storage_pointer;

        publisher.discard(id).await;

        assert!(!blobs.contains(&key).await);
        assert!(store.get_file(id).await.is_err());
    }
}
