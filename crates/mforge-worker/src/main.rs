//! Media job worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mforge_media::{check_ffmpeg, FfmpegRegistry};
use mforge_queue::JobQueue;
use mforge_storage::R2Client;
use mforge_store::RedisStore;
use mforge_worker::{HttpFetcher, JobExecutor, RetryPolicy, RunnerDeps, TaskRunner, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("mforge=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting mforge-worker");

    let config = WorkerConfig::from_env();
    let policy = RetryPolicy::from_env();
    info!("Worker config: {:?}", config);
    info!("Retry policy: {:?}", policy);

    match check_ffmpeg() {
        Ok(path) => info!("Using ffmpeg at {}", path.display()),
        Err(e) => warn!("{}; every operation will fail until it is installed", e),
    }

    let store = Arc::new(RedisStore::from_env().context("Failed to create task store")?);
    store
        .check_connectivity()
        .await
        .context("Task store is unreachable")?;

    let blobs = Arc::new(R2Client::from_env().context("Failed to create blob store client")?);
    let queue = Arc::new(JobQueue::from_env().context("Failed to create job queue")?);
    let fetcher = Arc::new(HttpFetcher::new(config.remote_fetch_timeout)?);

    let deps = RunnerDeps {
        tasks: store.clone(),
        files: store,
        blobs,
        dispatcher: queue.clone(),
        fetcher,
        registry: Arc::new(FfmpegRegistry::new()),
    };
    let runner = Arc::new(TaskRunner::new(deps, &config, policy));
    let executor = Arc::new(JobExecutor::new(config, queue, runner));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    executor.run().await?;

    info!("Worker shutdown complete");
    Ok(())
}
