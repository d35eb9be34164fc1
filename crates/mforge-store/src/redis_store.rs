//! Redis-backed task and file store.
//!
//! Records are stored as JSON strings under `{prefix}:task:{id}` and
//! `{prefix}:file:{id}`; ids come from `INCR` on `{prefix}:task:seq` and
//! `{prefix}:file:seq`.
//!
//! Task mutations are optimistic: the record is read, changed in Rust and
//! written back only if it is still byte-for-byte what was read. A lost
//! race rereads and reapplies the change against the new record.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, info, warn};

use mforge_models::{FileId, FileRecord, NewFile, NewTask, Task, TaskId, TaskStatus};

use crate::error::{StoreError, StoreResult};
use crate::repos::{
    apply_completion, apply_error, apply_output, apply_progress, apply_result, apply_retry_reset, apply_status,
    FileRepository, JobStore,
};

/// Promote a remote file record only while it still points at the remote URL.
///
/// KEYS[1] = file key; ARGV = remote_url, blob_key, size.
/// Returns 1 on success, 0 when the precondition failed, -1 when missing.
const PROMOTE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return -1
end
local rec = cjson.decode(raw)
if rec['is_remote'] ~= true or rec['storage_pointer'] ~= ARGV[1] then
  return 0
end
rec['is_remote'] = false
rec['storage_pointer'] = ARGV[2]
rec['size'] = tonumber(ARGV[3])
redis.call('SET', KEYS[1], cjson.encode(rec))
return 1
"#;

/// Replace a record only if it still holds the expected value.
///
/// KEYS[1] = record key; ARGV = expected JSON, replacement JSON.
/// Returns 1 when swapped, 0 when the record changed or vanished.
const SWAP_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

/// Read-modify-write rounds before a task update gives up.
const MAX_SWAP_ATTEMPTS: usize = 16;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key namespace
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "mforge".to_string(),
        }
    }
}

impl RedisStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "mforge".to_string()),
        }
    }
}

/// Redis task/file store.
pub struct RedisStore {
    client: redis::Client,
    config: RedisStoreConfig,
    promote: redis::Script,
    swap: redis::Script,
}

impl RedisStore {
    pub fn new(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            promote: redis::Script::new(PROMOTE_SCRIPT),
            swap: redis::Script::new(SWAP_SCRIPT),
        })
    }

    pub fn from_env() -> StoreResult<Self> {
        Self::new(RedisStoreConfig::from_env())
    }

    /// Ping the backend.
    pub async fn check_connectivity(&self) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    fn task_key(&self, id: TaskId) -> String {
        format!("{}:task:{}", self.config.key_prefix, id)
    }

    fn file_key(&self, id: FileId) -> String {
        format!("{}:file:{}", self.config.key_prefix, id)
    }

    fn seq_key(&self, kind: &str) -> String {
        format!("{}:{}:seq", self.config.key_prefix, kind)
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn load_raw_task(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: TaskId,
    ) -> StoreResult<(String, Task)> {
        let key = self.task_key(id);
        let raw: Option<String> = conn.get(&key).await?;
        let raw = raw.ok_or(StoreError::TaskNotFound(id))?;
        let task = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            key,
            reason: e.to_string(),
        })?;
        Ok((raw, task))
    }

    async fn save_task(&self, conn: &mut redis::aio::MultiplexedConnection, task: &Task) -> StoreResult<()> {
        let payload = serde_json::to_string(task)?;
        conn.set::<_, _, ()>(self.task_key(task.id), payload).await?;
        Ok(())
    }

    /// Atomically read-modify-write a task record.
    ///
    /// `f` may run more than once and must not have side effects. An error
    /// from `f` aborts the update without writing.
    async fn update<F>(&self, id: TaskId, f: F) -> StoreResult<Task>
    where
        F: Fn(&mut Task) -> StoreResult<()> + Send + Sync,
    {
        let mut conn = self.connection().await?;
        for round in 1..=MAX_SWAP_ATTEMPTS {
            let (raw, mut task) = self.load_raw_task(&mut conn, id).await?;
            f(&mut task)?;
            let payload = serde_json::to_string(&task)?;

            let swapped: i64 = self
                .swap
                .key(self.task_key(id))
                .arg(&raw)
                .arg(&payload)
                .invoke_async(&mut conn)
                .await?;
            if swapped == 1 {
                return Ok(task);
            }
            debug!(task_id = %id, round, "Task changed during update, retrying");
        }

        warn!(task_id = %id, "Gave up updating task after {} rounds", MAX_SWAP_ATTEMPTS);
        Err(StoreError::Contended(id))
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn create(&self, new: NewTask) -> StoreResult<Task> {
        let mut conn = self.connection().await?;
        let id: i64 = conn.incr(self.seq_key("task"), 1).await?;
        let task = new.into_task(TaskId(id));
        self.save_task(&mut conn, &task).await?;
        info!(task_id = %task.id, task_type = %task.task_type, "Created task");
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> StoreResult<Task> {
        let mut conn = self.connection().await?;
        self.load_raw_task(&mut conn, id).await.map(|(_, task)| task)
    }

    async fn set_status(&self, id: TaskId, status: TaskStatus, error: Option<String>) -> StoreResult<Task> {
        let task = self.update(id, |t| apply_status(t, status, error.clone())).await?;
        debug!(task_id = %id, status = %status, "Updated task status");
        Ok(task)
    }

    async fn set_progress(&self, id: TaskId, progress: f64) -> StoreResult<()> {
        self.update(id, |t| {
            apply_progress(t, progress);
            Ok(())
        })
        .await
        .map(|_| ())
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
            apply_result(t, payload.clone());
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn complete(&self, id: TaskId, file_id: FileId, payload: Value) -> StoreResult<Task> {
        let task = self.update(id, |t| apply_completion(t, file_id, payload.clone())).await?;
        debug!(task_id = %id, file_id = %file_id, "Completed task");
        Ok(task)
    }

    async fn set_error(&self, id: TaskId, error: Option<String>) -> StoreResult<()> {
        self.update(id, |t| {
            apply_error(t, error.clone());
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
impl FileRepository for RedisStore {
    async fn create_file(&self, new: NewFile) -> StoreResult<FileRecord> {
        let mut conn = self.connection().await?;
        let id: i64 = conn.incr(self.seq_key("file"), 1).await?;
        let record = new.into_record(FileId(id));
        let payload = serde_json::to_string(&record)?;
        conn.set::<_, _, ()>(self.file_key(record.id), payload).await?;
        Ok(record)
    }

    async fn get_file(&self, id: FileId) -> StoreResult<FileRecord> {
        let mut conn = self.connection().await?;
        let key = self.file_key(id);
        let raw: Option<String> = conn.get(&key).await?;
        let raw = raw.ok_or(StoreError::FileNotFound(id.0))?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            key,
            reason: e.to_string(),
        })
    }

    async fn promote_remote(&self, id: FileId, remote_url: &str, blob_key: &str, size: u64) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let outcome: i64 = self
            .promote
            .key(self.file_key(id))
            .arg(remote_url)
            .arg(blob_key)
            .arg(size)
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            1 => {
                info!(file_id = %id, blob_key, "Promoted remote file");
                Ok(true)
            }
            0 => {
                warn!(file_id = %id, "Remote file already promoted by another caller");
                Ok(false)
            }
            _ => Err(StoreError::FileNotFound(id.0)),
        }
    }

    async fn delete_file(&self, id: FileId) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.file_key(id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let store = RedisStore::new(RedisStoreConfig::default()).unwrap();
        assert_eq!(store.task_key(TaskId(7)), "mforge:task:7");
        assert_eq!(store.file_key(FileId(3)), "mforge:file:3");
        assert_eq!(store.seq_key("task"), "mforge:task:seq");
    }

    #[test]
    fn test_config_defaults() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.key_prefix, "mforge");
        assert!(config.redis_url.starts_with("redis://"));
    }
}
