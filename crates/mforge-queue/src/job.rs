//! Queue message for one task attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mforge_models::TaskId;

/// Message carried by the dispatch stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJob {
    pub task_id: TaskId,
    /// Task config snapshot at enqueue time
    #[serde(default)]
    pub config: Value,
    /// 1-based attempt number; only internal backoff increments it
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

fn first_attempt() -> u32 {
    1
}

impl QueueJob {
    /// First attempt for a task.
    pub fn new(task_id: TaskId, config: Value) -> Self {
        Self {
            task_id,
            config,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// Message for the following attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            task_id: self.task_id,
            config: self.config.clone(),
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
        }
    }
}
