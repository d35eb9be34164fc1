//! Task control: the create, retry and cancel entry points.

use std::sync::Arc;

use tracing::info;

use mforge_models::{CombinedConfig, NewTask, Task, TaskId, TaskStatus, TaskType};
use mforge_queue::{Dispatcher, QueueJob};
use mforge_store::{JobStore, StoreError};

use crate::error::{WorkerError, WorkerResult};

/// Creates, retries and cancels tasks on behalf of callers.
pub struct TaskControl {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl TaskControl {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Store a new `Pending` task and enqueue its first attempt.
    ///
    /// Combined configs are validated up front so a malformed pipeline is
    /// rejected before a task exists.
    pub async fn create_task(&self, new: NewTask) -> WorkerResult<Task> {
        if new.task_type == TaskType::Combined {
            CombinedConfig::parse(&new.config, new.input_files.first().copied())?;
        }

        let task = self.store.create(new).await?;
        self.dispatcher.enqueue(QueueJob::new(task.id, task.config.clone())).await?;
        info!(task_id = %task.id, task_type = %task.task_type, "Task created");
        Ok(task)
    }

    /// Explicit retry of a failed task.
    pub async fn retry_task(&self, id: TaskId) -> WorkerResult<Task> {
        let task = match self.store.reset_for_retry(id).await {
            Ok(task) => task,
            Err(StoreError::InvalidTransition { from, .. }) => {
                return Err(WorkerError::validation(format!(
                    "Task {} is {} and cannot be retried",
                    id, from
                )))
            }
            Err(e) => return Err(e.into()),
        };

        self.dispatcher.enqueue(QueueJob::new(task.id, task.config.clone())).await?;
        info!(task_id = %task.id, retry_count = task.retry_count, "Task retried");
        Ok(task)
    }

    /// Cancel a pending or processing task.
    ///
    /// A running attempt is not interrupted; it notices nothing until its
    /// own status writes are rejected.
    pub async fn cancel_task(&self, id: TaskId) -> WorkerResult<Task> {
        let task = self.store.get(id).await?;
        if !task.status.is_cancellable() {
            return Err(WorkerError::validation(format!(
                "Task {} is {} and cannot be cancelled",
                id, task.status
            )));
        }

        let task = match self.store.set_status(id, TaskStatus::Cancelled, None).await {
            Ok(task) => task,
            Err(StoreError::InvalidTransition { from, .. }) => {
                return Err(WorkerError::validation(format!(
                    "Task {} is {} and cannot be cancelled",
                    id, from
                )))
            }
            Err(e) => return Err(e.into()),
        };
        info!(task_id = %id, "Task cancelled");
        Ok(task)
    }
}
