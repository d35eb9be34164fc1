//! Redis Streams task dispatch.
//!
//! This crate provides:
//! - The `Dispatcher` contract with a single in-flight attempt per task
//! - Task enqueueing and consumption via Redis Streams
//! - Delayed retries through a sorted set promoted into the stream

pub mod dispatcher;
pub mod error;
pub mod job;
pub mod queue;

pub use dispatcher::{Dispatcher, MemoryDispatcher};
pub use error::{QueueError, QueueResult};
pub use job::QueueJob;
pub use queue::{JobQueue, QueueConfig};
