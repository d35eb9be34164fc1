//! Media job worker.
//!
//! This crate provides:
//! - The task runner: one attempt from load to publish, with retry scheduling
//! - The pipeline composer for combined and single-operation tasks
//! - Input materialization with remote-file promotion, and result publication
//! - Task control entry points (create, retry, cancel)
//! - The job executor driving the Redis Streams queue

pub mod config;
pub mod control;
pub mod error;
pub mod executor;
pub mod logging;
pub mod materializer;
pub mod pipeline;
pub mod publisher;
pub mod retry;
pub mod runner;
pub mod signals;

#[cfg(test)]
mod testing;

pub use config::WorkerConfig;
pub use control::TaskControl;
pub use error::{ErrorKind, WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use materializer::{HttpFetcher, Materializer, RemoteFetcher};
pub use pipeline::{PipelineComposer, PipelinePlan, PlannedStage};
pub use publisher::ResultPublisher;
pub use retry::{retry_async, FailureTracker, RetryConfig, RetryPolicy, RetryResult};
pub use runner::{RunOutcome, RunnerDeps, TaskRunner};
pub use signals::ConsistencySignals;
