//! Consistency signals around a task attempt.
//!
//! The runner's own status writes and the retry scheduling are not one
//! transaction. These hooks re-check the stored status at the edges of an
//! attempt and settle it when the runner's write did not land.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use mforge_models::{FileId, Task, TaskId, TaskStatus};
use mforge_store::{JobStore, StoreError};

use crate::retry::{retry_async, RetryConfig};

pub struct ConsistencySignals {
    store: Arc<dyn JobStore>,
    retry: RetryConfig,
}

impl ConsistencySignals {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            retry: RetryConfig::new("task_signal").with_max_retries(2),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Flip a still-pending task to `Processing`.
    pub async fn before_run(&self, task: &Task) {
        if task.status != TaskStatus::Pending {
            return;
        }
        let result = retry_async(&self.retry, StoreError::is_transient, || {
            self.store.set_status(task.id, TaskStatus::Processing, None)
        })
        .await;
        if let Err(e) = result.into_result() {
            warn!(task_id = %task.id, "Pre-run status write failed: {}", e);
        }
    }

    /// Finish the task with its published result unless it already reached
    /// a terminal state. Returns whether the task is `Completed` afterwards.
    pub async fn on_success(&self, id: TaskId, file_id: FileId, payload: &Value) -> bool {
        let result = retry_async(&self.retry, StoreError::is_transient, || async move {
            let task = self.store.get(id).await?;
            if task.status.is_terminal() {
                return Ok(task.status);
            }
            let task = self.store.complete(id, file_id, payload.clone()).await?;
            Ok::<_, StoreError>(task.status)
        })
        .await;

        match result.into_result() {
            Ok(TaskStatus::Completed) => true,
            Ok(status) => {
                info!(task_id = %id, status = %status, "Task settled before its result was linked");
                false
            }
            Err(e) => {
                warn!(task_id = %id, "Failed to settle task completion: {}", e);
                false
            }
        }
    }

    /// Settle `Failed` with `message` unless the task already reached a
    /// terminal state.
    pub async fn on_failure(&self, id: TaskId, message: &str) {
        self.settle(id, TaskStatus::Failed, Some(message.to_string())).await;
    }

    async fn settle(&self, id: TaskId, status: TaskStatus, error: Option<String>) {
        let result = retry_async(&self.retry, StoreError::is_transient, || {
            let error = error.clone();
            async move {
                let task = self.store.get(id).await?;
                if task.status.is_terminal() {
                    return Ok(false);
                }
                self.store.set_status(id, status, error).await?;
                Ok::<_, StoreError>(true)
            }
        })
        .await;

        match result.into_result() {
            Ok(true) => info!(task_id = %id, status = %status, "Settled task status"),
            Ok(false) => {}
            Err(e) => warn!(task_id = %id, status = %status, "Failed to settle task status: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mforge_models::{NewTask, TaskType};
    use mforge_store::MemoryStore;
    use serde_json::json;

    async fn setup() -> (Arc<MemoryStore>, ConsistencySignals, Task) {
        let store = Arc::new(MemoryStore::new());
        let task = store.create(NewTask::new("u1", TaskType::Join, json!({}))).await.unwrap();
        let signals = ConsistencySignals::new(store.clone());
        (store, signals, task)
    }

    #[tokio::test]
    async fn test_before_run_only_moves_pending() {
        let (store, signals, task) = setup().await;
        signals.before_run(&task).await;
        assert_eq!(store.get(task.id).await.unwrap().status, TaskStatus::Processing);

        let processing = store.get(task.id).await.unwrap();
        signals.before_run(&processing).await;
        assert_eq!(store.status_history(task.id).await, vec![TaskStatus::Processing]);
    }

    #[tokio::test]
    async fn test_success_settles_unfinished_task_with_its_result() {
        let (store, signals, task) = setup().await;
        store.set_status(task.id, TaskStatus::Processing, None).await.unwrap();

        assert!(signals.on_success(task.id, FileId(9), &json!({"result_file_id": 9})).await);

        let task = store.get(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.output_files, vec![FileId(9)]);
        assert_eq!(task.result, Some(json!({"result_file_id": 9})));
    }

    #[tokio::test]
    async fn test_success_does_not_touch_cancelled_task() {
        let (store, signals, task) = setup().await;
        store.set_status(task.id, TaskStatus::Cancelled, None).await.unwrap();

        assert!(!signals.on_success(task.id, FileId(9), &json!({})).await);

        let task = store.get(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.output_files.is_empty());
    }

    #[tokio::test]
    async fn test_failure_leaves_terminal_task_alone() {
        let (store, signals, task) = setup().await;
        store.set_status(task.id, TaskStatus::Cancelled, None).await.unwrap();
        signals.on_failure(task.id, "boom").await;

        let task = store.get(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.error_message, None);
    }

    #[tokio::test]
    async fn test_failure_records_message() {
        let (store, signals, task) = setup().await;
        store.set_status(task.id, TaskStatus::Processing, None).await.unwrap();
        signals.on_failure(task.id, "disk full").await;

        let task = store.get(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("disk full"));
    }
}
