//! In-process task and file store.
//!
//! Keeps a write history per task so tests can check the sequence of
//! status and progress values a run produced.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use mforge_models::{FileId, FileRecord, NewFile, NewTask, Task, TaskId, TaskStatus};

use crate::error::{StoreError, StoreResult};
use crate::repos::{
    apply_completion, apply_error, apply_output, apply_progress, apply_promotion, apply_result, apply_retry_reset, apply_status,
    FileRepository, JobStore,
};

#[derive(Default)]
struct Inner {
    next_task: i64,
    next_file: i64,
    tasks: HashMap<TaskId, Task>,
    files: HashMap<FileId, FileRecord>,
    status_history: HashMap<TaskId, Vec<TaskStatus>>,
    progress_history: HashMap<TaskId, Vec<f64>>,
    file_lookups: usize,
}

/// Store backed by in-memory maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status written for a task, in order.
    pub async fn status_history(&self, id: TaskId) -> Vec<TaskStatus> {
        self.inner.lock().await.status_history.get(&id).cloned().unwrap_or_default()
    }

    /// Every progress value written for a task, in order.
    pub async fn progress_history(&self, id: TaskId) -> Vec<f64> {
        self.inner.lock().await.progress_history.get(&id).cloned().unwrap_or_default()
    }

    /// Number of `get_file` calls served.
    pub async fn file_lookups(&self) -> usize {
        self.inner.lock().await.file_lookups
    }

    pub async fn file_count(&self) -> usize {
        self.inner.lock().await.files.len()
    }

    async fn update<F>(&self, id: TaskId, f: F) -> StoreResult<Task>
    where
        F: FnOnce(&mut Task) -> StoreResult<()> + Send,
    {
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        f(task)?;
        Ok(task.clone())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, new: NewTask) -> StoreResult<Task> {
        let mut inner = self.inner.lock().await;
        inner.next_task += 1;
        let task = new.into_task(TaskId(inner.next_task));
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> StoreResult<Task> {
        self.inner
            .lock()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }

    async fn set_status(&self, id: TaskId, status: TaskStatus, error: Option<String>) -> StoreResult<Task> {
        let task = self.update(id, |t| apply_status(t, status, error)).await?;
        self.inner
            .lock()
            .await
            .status_history
            .entry(id)
            .or_default()
            .push(status);
        Ok(task)
    }

    async fn set_progress(&self, id: TaskId, progress: f64) -> StoreResult<()> {
        let task = self
            .update(id, |t| {
                apply_progress(t, progress);
                Ok(())
            })
            .await?;
        self.inner
            .lock()
            .await
            .progress_history
            .entry(id)
            .or_default()
            .push(task.progress);
        Ok(())
    }

    async fn append_output_file(&self, id: TaskId, file_id: FileId) -> StoreResult<()> {
        self.update(id, |t| {
            apply_output(t, file_id);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn set_result(&self, id: TaskId, payload: Value) -> StoreResult<()> {
        self.update(id, |t| {
            apply_result(t, payload);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn complete(&self, id: TaskId, file_id: FileId, payload: Value) -> StoreResult<Task> {
        let task = self.update(id, |t| apply_completion(t, file_id, payload)).await?;
        let mut inner = self.inner.lock().await;
        inner.status_history.entry(id).or_default().push(TaskStatus::Completed);
        inner.progress_history.entry(id).or_default().push(task.progress);
        Ok(task)
    }

    async fn set_error(&self, id: TaskId, error: Option<String>) -> StoreResult<()> {
        self.update(id, |t| {
            apply_error(t, error);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn reset_for_retry(&self, id: TaskId) -> StoreResult<Task> {
        self.update(id, apply_retry_reset).await
    }
}

#[async_trait]
impl FileRepository for MemoryStore {
    async fn create_file(&self, new: NewFile) -> StoreResult<FileRecord> {
        let mut inner = self.inner.lock().await;
        inner.next_file += 1;
        let record = new.into_record(FileId(inner.next_file));
        inner.files.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_file(&self, id: FileId) -> StoreResult<FileRecord> {
        let mut inner = self.inner.lock().await;
        inner.file_lookups += 1;
        inner.files.get(&id).cloned().ok_or(StoreError::FileNotFound(id.0))
    }

    async fn promote_remote(&self, id: FileId, remote_url: &str, blob_key: &str, size: u64) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let file = inner.files.get_mut(&id).ok_or(StoreError::FileNotFound(id.0))?;
        Ok(apply_promotion(file, remote_url, blob_key, size))
    }

    async fn delete_file(&self, id: FileId) -> StoreResult<()> {
        self.inner.lock().await.files.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mforge_models::TaskType;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_ids_and_defaults() {
        let store = MemoryStore::new();
        let a = store.create(NewTask::new("u", TaskType::Join, json!({}))).await.unwrap();
        let b = store.create(NewTask::new("u", TaskType::Subtitles, json!({}))).await.unwrap();
        assert_eq!(a.id, TaskId(1));
        assert_eq!(b.id, TaskId(2));
        assert_eq!(b.status, TaskStatus::Pending);
        assert!(b.output_files.is_empty());
    }

    #[tokio::test]
    async fn test_progress_clamped_and_recorded() {
        let store = MemoryStore::new();
        let t = store.create(NewTask::new("u", TaskType::Join, json!({}))).await.unwrap();
        store.set_progress(t.id, 50.0).await.unwrap();
        store.set_progress(t.id, 250.0).await.unwrap();
        assert_eq!(store.get(t.id).await.unwrap().progress, 100.0);
        assert_eq!(store.progress_history(t.id).await, vec![50.0, 100.0]);
    }

    #[tokio::test]
    async fn test_outputs_append_only() {
        let store = MemoryStore::new();
        let t = store.create(NewTask::new("u", TaskType::Join, json!({}))).await.unwrap();
        store.append_output_file(t.id, FileId(3)).await.unwrap();
        store.append_output_file(t.id, FileId(1)).await.unwrap();
        assert_eq!(store.get(t.id).await.unwrap().output_files, vec![FileId(3), FileId(1)]);
    }

    #[tokio::test]
    async fn test_invalid_transition_not_recorded() {
        let store = MemoryStore::new();
        let t = store.create(NewTask::new("u", TaskType::Join, json!({}))).await.unwrap();
        assert!(store.set_status(t.id, TaskStatus::Completed, None).await.is_err());
        assert!(store.status_history(t.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_complete_rejected_after_cancel() {
        let store = MemoryStore::new();
        let t = store.create(NewTask::new("u", TaskType::Subtitles, json!({}))).await.unwrap();
        store.set_status(t.id, TaskStatus::Processing, None).await.unwrap();
        store.set_status(t.id, TaskStatus::Cancelled, None).await.unwrap();

        let err = store.complete(t.id, FileId(2), json!({"result_file_id": 2})).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let stored = store.get(t.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert!(stored.output_files.is_empty());
        assert!(stored.result.is_none());
        assert_eq!(
            store.status_history(t.id).await,
            vec![TaskStatus::Processing, TaskStatus::Cancelled]
        );
    }

    #[tokio::test]
    async fn test_delete_file_is_idempotent() {
        let store = MemoryStore::new();
        let f = store
            .create_file(NewFile::stored("u", "outputs/u/1.mp4", 4, "video/mp4"))
            .await
            .unwrap();
        store.delete_file(f.id).await.unwrap();
        store.delete_file(f.id).await.unwrap();
        assert_eq!(store.file_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_entities() {
        let store = MemoryStore::new();
        assert!(matches!(store.get(TaskId(9)).await, Err(StoreError::TaskNotFound(_))));
        assert!(matches!(store.get_file(FileId(9)).await, Err(StoreError::FileNotFound(9))));
    }

    #[tokio::test]
    async fn test_promote_remote_once() {
        let store = MemoryStore::new();
        let f = store
            .create_file(NewFile::remote("u", "https://x/v.mp4", "video/mp4"))
            .await
            .unwrap();
        assert!(store.promote_remote(f.id, "https://x/v.mp4", "uploads/u/1.mp4", 5).await.unwrap());
        assert!(!store.promote_remote(f.id, "https://x/v.mp4", "uploads/u/2.mp4", 5).await.unwrap());
        assert_eq!(store.get_file(f.id).await.unwrap().storage_pointer, "uploads/u/1.mp4");
    }
}
