//! Task queue using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use mforge_models::TaskId;

use crate::dispatcher::Dispatcher;
use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

/// Move due entries from the delayed set into the stream.
///
/// KEYS[1] = delayed set, KEYS[2] = stream; ARGV = now_ms, limit.
const PROMOTE_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, payload in ipairs(due) do
  local job = cjson.decode(payload)
  redis.call('XADD', KEYS[2], '*', 'job', payload, 'task', tostring(job['task_id']))
  redis.call('ZREM', KEYS[1], payload)
end
return #due
"#;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for task messages
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Sorted set holding delayed retries, scored by due time (ms)
    pub delayed_set: String,
    /// Prefix for per-task in-flight keys
    pub dedup_prefix: String,
    /// Lifetime of an in-flight claim
    pub dedup_ttl: Duration,
    /// Idle time after which a pending message may be claimed by another worker
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "mforge:tasks".to_string(),
            consumer_group: "mforge:workers".to_string(),
            delayed_set: "mforge:tasks:delayed".to_string(),
            dedup_prefix: "mforge:dedup".to_string(),
            dedup_ttl: Duration::from_secs(7200),
            visibility_timeout: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            delayed_set: std::env::var("QUEUE_DELAYED_SET").unwrap_or(defaults.delayed_set),
            dedup_prefix: defaults.dedup_prefix,
            dedup_ttl: std::env::var("QUEUE_DEDUP_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_ttl),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
        }
    }
}

/// Redis Streams task queue.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
    promote_due: redis::Script,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            promote_due: redis::Script::new(PROMOTE_DUE_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    fn dedup_key(&self, task_id: TaskId) -> String {
        format!("{}:{}", self.config.dedup_prefix, task_id)
    }

    /// Acknowledge a message and remove it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Move delayed retries whose due time has passed into the stream.
    pub async fn promote_due(&self, limit: usize) -> QueueResult<usize> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let moved: usize = self
            .promote_due
            .key(&self.config.delayed_set)
            .key(&self.config.stream_name)
            .arg(Utc::now().timestamp_millis())
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;

        if moved > 0 {
            info!("Promoted {} delayed task(s) into the stream", moved);
        }
        Ok(moved)
    }

    /// Get stream length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Number of retries waiting in the delayed set.
    pub async fn delayed_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.zcard(&self.config.delayed_set).await?;
        Ok(len)
    }

    /// Read new messages for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = result
            .map(|reply| reply.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();
        Ok(self.decode_entries(entries).await)
    }

    /// Refresh ownership of a message that is still being worked on.
    ///
    /// Re-claiming the message for its current consumer resets its idle
    /// time, so `claim_pending` on other workers leaves it alone, and the
    /// task's in-flight key is extended.
    pub async fn heartbeat(&self, consumer_name: &str, message_id: &str, task_id: TaskId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async::<()>(&mut conn)
            .await?;
        conn.expire::<_, ()>(self.dedup_key(task_id), self.config.dedup_ttl.as_secs() as i64)
            .await?;

        debug!(task_id = %task_id, "Refreshed ownership of message {}", message_id);
        Ok(())
    }

    /// Claim messages left pending by crashed workers.
    ///
    /// Live workers keep their messages fresh with [`JobQueue::heartbeat`],
    /// so only messages idle past the visibility timeout are taken.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }
        let claimed: redis::streams::StreamClaimReply = cmd.query_async(&mut conn).await?;

        let jobs = self.decode_entries(claimed.ids).await;
        for (_, job) in &jobs {
            info!(task_id = %job.task_id, "Claimed pending task from stream");
        }
        Ok(jobs)
    }

    async fn decode_entries(&self, entries: Vec<redis::streams::StreamId>) -> Vec<(String, QueueJob)> {
        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            let parsed = entry
                .get::<String>("job")
                .map(|payload| serde_json::from_str::<QueueJob>(&payload));
            match parsed {
                Some(Ok(job)) => {
                    debug!(task_id = %job.task_id, attempt = job.attempt, "Consumed task message");
                    jobs.push((entry.id, job));
                }
                Some(Err(e)) => {
                    warn!("Failed to parse task payload {}: {}", entry.id, e);
                    self.ack(&entry.id).await.ok();
                }
                None => {
                    warn!("Message {} has no job field", entry.id);
                    self.ack(&entry.id).await.ok();
                }
            }
        }
        jobs
    }
}

#[async_trait]
impl Dispatcher for JobQueue {
    async fn enqueue(&self, job: QueueJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&job)?;
        let dedup_key = self.dedup_key(job.task_id);

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(job.attempt)
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            warn!(task_id = %job.task_id, "Duplicate task rejected");
            return Err(QueueError::Duplicate(job.task_id));
        }

        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("task")
            .arg(job.task_id.as_i64())
            .query_async(&mut conn)
            .await;

        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                conn.del::<_, ()>(&dedup_key).await.ok();
                return Err(e.into());
            }
        };

        info!(task_id = %job.task_id, "Enqueued task with message ID {}", message_id);
        Ok(message_id)
    }

    async fn enqueue_delayed(&self, job: QueueJob, delay: Duration) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&job)?;
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        conn.zadd::<_, _, _, ()>(&self.config.delayed_set, &payload, due_ms).await?;

        // Keep the claim alive across the delay.
        let ttl = self.config.dedup_ttl.as_secs() + delay.as_secs();
        conn.set_ex::<_, _, ()>(self.dedup_key(job.task_id), job.attempt, ttl).await?;

        info!(
            task_id = %job.task_id,
            attempt = job.attempt,
            delay_secs = delay.as_secs(),
            "Scheduled delayed retry"
        );
        Ok(())
    }

    async fn release(&self, task_id: TaskId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(self.dedup_key(task_id)).await?;
        debug!(task_id = %task_id, "Released in-flight claim");
        Ok(())
    }
}
