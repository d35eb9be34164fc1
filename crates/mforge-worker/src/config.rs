//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent task attempts
    pub max_concurrent_jobs: usize,
    /// Root for per-attempt working directories
    pub work_dir: PathBuf,
    /// Upper bound for one FFmpeg invocation
    pub operation_timeout: Duration,
    /// How often due delayed retries are moved into the stream
    pub promote_interval: Duration,
    /// How often the worker scans for orphaned pending messages
    pub claim_interval: Duration,
    /// How often ownership of an in-flight message is refreshed; must stay
    /// well below the queue's visibility timeout
    pub heartbeat_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Timeout for downloading a remote file
    pub remote_fetch_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            work_dir: PathBuf::from("/tmp/mforge"),
            operation_timeout: Duration::from_secs(1800),
            promote_interval: Duration::from_secs(5),
            claim_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
            remote_fetch_timeout: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            operation_timeout: secs_var("WORKER_OPERATION_TIMEOUT_SECS").unwrap_or(defaults.operation_timeout),
            promote_interval: secs_var("WORKER_PROMOTE_INTERVAL_SECS").unwrap_or(defaults.promote_interval),
            claim_interval: secs_var("WORKER_CLAIM_INTERVAL_SECS").unwrap_or(defaults.claim_interval),
            heartbeat_interval: secs_var("WORKER_HEARTBEAT_INTERVAL_SECS").unwrap_or(defaults.heartbeat_interval),
            shutdown_timeout: secs_var("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(defaults.shutdown_timeout),
            remote_fetch_timeout: secs_var("REMOTE_FETCH_TIMEOUT_SECS").unwrap_or(defaults.remote_fetch_timeout),
        }
    }
}

fn secs_var(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n: &u64| *n > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.work_dir, PathBuf::from("/tmp/mforge"));
        assert_eq!(config.operation_timeout, Duration::from_secs(1800));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_heartbeat_outpaces_visibility_timeout() {
        let config = WorkerConfig::default();
        let queue = mforge_queue::QueueConfig::default();
        assert!(config.heartbeat_interval * 4 <= queue.visibility_timeout);
    }
}
