//! Dispatch contract and an in-memory implementation.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use mforge_models::TaskId;

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

/// Fire-and-forget, at-least-once task dispatch.
///
/// A task holds at most one in-flight attempt: `enqueue` claims the task
/// and fails with [`QueueError::Duplicate`] while the claim is held.
/// `enqueue_delayed` keeps the claim for the next attempt and `release`
/// drops it once the task needs no further attempts.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Enqueue the first attempt of a task. Returns the message id.
    async fn enqueue(&self, job: QueueJob) -> QueueResult<String>;

    /// Schedule a follow-up attempt after `delay`.
    async fn enqueue_delayed(&self, job: QueueJob, delay: Duration) -> QueueResult<()>;

    /// Drop the in-flight claim for a task.
    async fn release(&self, task_id: TaskId) -> QueueResult<()>;
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    ready: VecDeque<QueueJob>,
    delayed: Vec<(QueueJob, Duration)>,
    in_flight: HashSet<TaskId>,
}

/// Dispatcher that keeps messages in process.
///
/// Delayed messages are recorded with their delay and never promoted on
/// their own; tests inspect them with [`MemoryDispatcher::delayed`].
#[derive(Default)]
pub struct MemoryDispatcher {
    inner: Mutex<Inner>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the next ready message.
    pub async fn pop(&self) -> Option<QueueJob> {
        self.inner.lock().await.ready.pop_front()
    }

    pub async fn ready_len(&self) -> usize {
        self.inner.lock().await.ready.len()
    }

    /// Delayed messages with their requested delays, in scheduling order.
    pub async fn delayed(&self) -> Vec<(QueueJob, Duration)> {
        self.inner.lock().await.delayed.clone()
    }

    pub async fn is_in_flight(&self, task_id: TaskId) -> bool {
        self.inner.lock().await.in_flight.contains(&task_id)
    }
}

#[async_trait]
impl Dispatcher for MemoryDispatcher {
    async fn enqueue(&self, job: QueueJob) -> QueueResult<String> {
        let mut inner = self.inner.lock().await;
        if !inner.in_flight.insert(job.task_id) {
            return Err(QueueError::Duplicate(job.task_id));
        }
        inner.next_id += 1;
        let id = format!("{}-0", inner.next_id);
        inner.ready.push_back(job);
        Ok(id)
    }

    async fn enqueue_delayed(&self, job: QueueJob, delay: Duration) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.in_flight.insert(job.task_id);
        inner.delayed.push((job, delay));
        Ok(())
    }

    async fn release(&self, task_id: TaskId) -> QueueResult<()> {
        self.inner.lock().await.in_flight.remove(&task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_second_enqueue_rejected_until_release() {
        let dispatcher = MemoryDispatcher::new();
        dispatcher.enqueue(QueueJob::new(TaskId(1), json!({}))).await.unwrap();

        let err = dispatcher.enqueue(QueueJob::new(TaskId(1), json!({}))).await.unwrap_err();
        assert!(matches!(err, QueueError::Duplicate(TaskId(1))));

        dispatcher.release(TaskId(1)).await.unwrap();
        assert!(dispatcher.enqueue(QueueJob::new(TaskId(1), json!({}))).await.is_ok());
        assert_eq!(dispatcher.ready_len().await, 2);
    }

    #[tokio::test]
    async fn test_delayed_keeps_claim() {
        let dispatcher = MemoryDispatcher::new();
        let job = QueueJob::new(TaskId(2), json!({}));
        dispatcher.enqueue(job.clone()).await.unwrap();
        dispatcher.pop().await.unwrap();

        dispatcher
            .enqueue_delayed(job.next_attempt(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(dispatcher.is_in_flight(TaskId(2)).await);
        let delayed = dispatcher.delayed().await;
        assert_eq!(delayed.len(), 1);
        assert_eq!(delayed[0].0.attempt, 2);
    }
}
