//! Repository contracts and the record mutations shared by every backend.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use mforge_models::{clamp_progress, FileId, FileRecord, NewFile, NewTask, Task, TaskId, TaskStatus};

use crate::error::{StoreError, StoreResult};

/// Persistence for tasks.
///
/// Every write is an atomic read-modify-write of the whole record, and
/// status writes are checked against the state machine, so a terminal task
/// is never reopened by a concurrent writer.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a task in `Pending` with zero progress and no outputs.
    async fn create(&self, new: NewTask) -> StoreResult<Task>;

    async fn get(&self, id: TaskId) -> StoreResult<Task>;

    /// Move to `status`, replacing the error message.
    async fn set_status(&self, id: TaskId, status: TaskStatus, error: Option<String>) -> StoreResult<Task>;

    /// Update progress, clamped into `[0, 100]`.
    async fn set_progress(&self, id: TaskId, progress: f64) -> StoreResult<()>;

    /// Append an output file id. Outputs are never removed.
    async fn append_output_file(&self, id: TaskId, file_id: FileId) -> StoreResult<()>;

    async fn set_result(&self, id: TaskId, payload: Value) -> StoreResult<()>;

    /// Finish a task in one write: append `file_id`, store the result,
    /// set progress to 100 and move to `Completed`.
    ///
    /// Nothing is written when the task can no longer complete.
    async fn complete(&self, id: TaskId, file_id: FileId, payload: Value) -> StoreResult<Task>;

    /// Replace the error message without touching status.
    async fn set_error(&self, id: TaskId, error: Option<String>) -> StoreResult<()>;

    /// Explicit user retry: `Failed → Pending`, bump `retry_count`, clear
    /// error and progress.
    async fn reset_for_retry(&self, id: TaskId) -> StoreResult<Task>;
}

/// Persistence for file records.
#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn create_file(&self, new: NewFile) -> StoreResult<FileRecord>;

    async fn get_file(&self, id: FileId) -> StoreResult<FileRecord>;

    /// Promote a remote file to a stored blob.
    ///
    /// Compare-and-swap: succeeds only while the record is still remote and
    /// still points at `remote_url`. Returns `false` when another caller got
    /// there first.
    async fn promote_remote(&self, id: FileId, remote_url: &str, blob_key: &str, size: u64) -> StoreResult<bool>;

    /// Remove a file record. Missing records are not an error.
    async fn delete_file(&self, id: FileId) -> StoreResult<()>;
}

pub(crate) fn apply_status(task: &mut Task, status: TaskStatus, error: Option<String>) -> StoreResult<()> {
    if !task.status.can_transition_to(status) {
        return Err(StoreError::InvalidTransition {
            task: task.id,
            from: task.status,
            to: status,
        });
    }

    let now = Utc::now();
    task.status = status;
    task.error_message = error;
    task.updated_at = now;
    if status.is_terminal() {
        task.completed_at = Some(now);
    }
    Ok(())
}

pub(crate) fn apply_progress(task: &mut Task, progress: f64) {
    task.progress = clamp_progress(progress);
    task.updated_at = Utc::now();
}

pub(crate) fn apply_output(task: &mut Task, file_id: FileId) {
    task.output_files.push(file_id);
    task.updated_at = Utc::now();
}

pub(crate) fn apply_result(task: &mut Task, payload: Value) {
    task.result = Some(payload);
    task.updated_at = Utc::now();
}

pub(crate) fn apply_completion(task: &mut Task, file_id: FileId, payload: Value) -> StoreResult<()> {
    apply_status(task, TaskStatus::Completed, None)?;
    task.output_files.push(file_id);
    task.result = Some(payload);
    task.progress = 100.0;
    Ok(())
}

pub(crate) fn apply_error(task: &mut Task, error: Option<String>) {
    task.error_message = error;
    task.updated_at = Utc::now();
}

pub(crate) fn apply_retry_reset(task: &mut Task) -> StoreResult<()> {
    if task.status != TaskStatus::Failed {
        return Err(StoreError::InvalidTransition {
            task: task.id,
            from: task.status,
            to: TaskStatus::Pending,
        });
    }

    task.status = TaskStatus::Pending;
    task.retry_count += 1;
    task.error_message = None;
    task.progress = 0.0;
    task.completed_at = None;
    task.updated_at = Utc::now();
    Ok(())
}

/// Returns `true` and rewrites the record when the CAS precondition holds.
pub(crate) fn apply_promotion(file: &mut FileRecord, remote_url: &str, blob_key: &str, size: u64) -> bool {
    if !file.is_remote || file.storage_pointer != remote_url {
        return false;
    }
    file.storage_pointer = blob_key.to_string();
    file.is_remote = false;
    file.size = size;
    true
}
