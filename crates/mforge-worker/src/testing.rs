//! Fakes shared by the worker's unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

use mforge_media::{
    source_key, MediaError, MediaResult, OperationProcessor, OperationRegistry, ProcessOutput, ProcessorContext,
};
use mforge_models::{content_type_for_extension, FileId, NewFile, NewTask, OperationKind, Task, TaskId, TaskStatus};
use mforge_queue::MemoryDispatcher;
use mforge_storage::MemoryBlobStore;
use mforge_store::{FileRepository, JobStore, MemoryStore, StoreError, StoreResult};

use crate::config::WorkerConfig;
use crate::control::TaskControl;
use crate::error::{WorkerError, WorkerResult};
use crate::materializer::{Materializer, RemoteFetcher};
use crate::pipeline::PipelineComposer;
use crate::retry::RetryPolicy;
use crate::runner::{RunnerDeps, TaskRunner};

/// A stage that ran to completion.
#[derive(Debug, Clone)]
pub(crate) struct StageCall {
    pub kind: OperationKind,
    pub config: Map<String, Value>,
    pub source: PathBuf,
    pub output: PathBuf,
}

#[derive(Default)]
struct Script {
    created: usize,
    calls: Vec<StageCall>,
}

/// Runs inside a stage before it does any work.
pub(crate) type StageHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Registry whose processors append their kind to the source file's
/// content. Failures, missing outputs and hooks are keyed by creation order.
#[derive(Default)]
pub(crate) struct ScriptedRegistry {
    state: Arc<Mutex<Script>>,
    failures: HashMap<usize, fn() -> MediaError>,
    no_output: HashSet<usize>,
    hooks: Mutex<HashMap<usize, StageHook>>,
}

impl ScriptedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_at(mut self, index: usize, error: fn() -> MediaError) -> Self {
        self.failures.insert(index, error);
        self
    }

    pub fn without_output_at(mut self, index: usize) -> Self {
        self.no_output.insert(index);
        self
    }

    pub fn before_stage(&self, index: usize, hook: StageHook) {
        self.hooks.lock().unwrap().insert(index, hook);
    }

    pub fn calls(&self) -> Vec<StageCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }
}

impl OperationRegistry for ScriptedRegistry {
    fn create(
        &self,
        kind: OperationKind,
        config: Map<String, Value>,
        ctx: &ProcessorContext,
    ) -> MediaResult<Box<dyn OperationProcessor>> {
        let mut state = self.state.lock().unwrap();
        let index = state.created;
        state.created += 1;
        Ok(Box::new(ScriptedProcessor {
            kind,
            config,
            ctx: ctx.clone(),
            failure: self.failures.get(&index).copied(),
            no_output: self.no_output.contains(&index),
            hook: self.hooks.lock().unwrap().get(&index).cloned(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedProcessor {
    kind: OperationKind,
    config: Map<String, Value>,
    ctx: ProcessorContext,
    failure: Option<fn() -> MediaError>,
    no_output: bool,
    hook: Option<StageHook>,
    state: Arc<Mutex<Script>>,
}

impl ScriptedProcessor {
    fn source(&self) -> MediaResult<PathBuf> {
        let value = match self.config.get(source_key(self.kind)) {
            Some(Value::Array(items)) => items.first(),
            other => other,
        };
        value
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| MediaError::invalid_config(self.kind, "source path missing"))
    }
}

#[async_trait]
impl OperationProcessor for ScriptedProcessor {
    fn kind(&self) -> OperationKind {
        self.kind
    }

    async fn validate(&self) -> MediaResult<()> {
        let source = self.source()?;
        if !source.is_file() {
            return Err(MediaError::FileNotFound(source));
        }
        Ok(())
    }

    async fn process(&self) -> MediaResult<ProcessOutput> {
        if let Some(hook) = &self.hook {
            hook().await;
        }
        if let Some(error) = self.failure {
            return Err(error());
        }
        if self.no_output {
            let mut out = Map::new();
            out.insert("status".to_string(), Value::String("ok".to_string()));
            return Ok(out);
        }

        let source = self.source()?;
        let body = tokio::fs::read_to_string(&source).await?;
        let output = self.ctx.output_path(self.kind, "mp4");
        tokio::fs::write(&output, format!("{}+{}", body, self.kind)).await?;

        self.state.lock().unwrap().calls.push(StageCall {
            kind: self.kind,
            config: self.config.clone(),
            source,
            output: output.clone(),
        });

        let mut out = Map::new();
        out.insert("result_path".to_string(), Value::String(output.to_string_lossy().into_owned()));
        Ok(out)
    }
}

/// Fetcher for tests that must never reach the network.
pub(crate) struct OfflineFetcher;

#[async_trait]
impl RemoteFetcher for OfflineFetcher {
    async fn fetch_to_file(&self, url: &str, _dest: &Path) -> WorkerResult<u64> {
        Err(WorkerError::transient_io(format!("offline: {}", url)))
    }
}

/// Task store whose completion write always fails as unavailable.
pub(crate) struct FailingCompletion(pub Arc<MemoryStore>);

#[async_trait]
impl JobStore for FailingCompletion {
    async fn create(&self, new: NewTask) -> StoreResult<Task> {
        self.0.create(new).await
    }

    async fn get(&self, id: TaskId) -> StoreResult<Task> {
        self.0.get(id).await
    }

    async fn set_status(&self, id: TaskId, status: TaskStatus, error: Option<String>) -> StoreResult<Task> {
        self.0.set_status(id, status, error).await
    }

    async fn set_progress(&self, id: TaskId, progress: f64) -> StoreResult<()> {
        self.0.set_progress(id, progress).await
    }

    async fn append_output_file(&self, id: TaskId, file_id: FileId) -> StoreResult<()> {
        self.0.append_output_file(id, file_id).await
    }

    async fn set_result(&self, id: TaskId, payload: Value) -> StoreResult<()> {
        self.0.set_result(id, payload).await
    }

    async fn complete(&self, _id: TaskId, _file_id: FileId, _payload: Value) -> StoreResult<Task> {
        Err(StoreError::unavailable("connection reset"))
    }

    async fn set_error(&self, id: TaskId, error: Option<String>) -> StoreResult<()> {
        self.0.set_error(id, error).await
    }

    async fn reset_for_retry(&self, id: TaskId) -> StoreResult<Task> {
        self.0.reset_for_retry(id).await
    }
}

/// In-memory backends wired together.
pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub dispatcher: Arc<MemoryDispatcher>,
    pub registry: Arc<ScriptedRegistry>,
    pub work_dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new(registry: ScriptedRegistry) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            dispatcher: Arc::new(MemoryDispatcher::new()),
            registry: Arc::new(registry),
            work_dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Register a stored file with `data` as its content.
    pub async fn stored_file(&self, owner: &str, name: &str, data: &[u8]) -> FileId {
        let key = format!("uploads/{}/{}", owner, name);
        let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("bin");
        let content_type = content_type_for_extension(ext);
        self.blobs.insert(key.clone(), data.to_vec(), content_type).await;
        self.store
            .create_file(NewFile::stored(owner, key, data.len() as u64, content_type))
            .await
            .unwrap()
            .id
    }

    pub async fn task(&self, new: NewTask) -> Task {
        self.store.create(new).await.unwrap()
    }

    pub fn materializer(&self) -> Arc<Materializer> {
        Arc::new(Materializer::new(
            self.store.clone(),
            self.blobs.clone(),
            Arc::new(OfflineFetcher),
        ))
    }

    pub fn composer(&self) -> PipelineComposer {
        PipelineComposer::new(self.materializer(), self.registry.clone(), self.store.clone())
    }

    pub fn runner(&self) -> TaskRunner {
        self.runner_with_tasks(self.store.clone())
    }

    /// Runner whose task writes go through `tasks`; files stay in memory.
    pub fn runner_with_tasks(&self, tasks: Arc<dyn JobStore>) -> TaskRunner {
        let deps = RunnerDeps {
            tasks,
            files: self.store.clone(),
            blobs: self.blobs.clone(),
            dispatcher: self.dispatcher.clone(),
            fetcher: Arc::new(OfflineFetcher),
            registry: self.registry.clone(),
        };
        let config = WorkerConfig {
            work_dir: self.work_dir.path().to_path_buf(),
            ..Default::default()
        };
        TaskRunner::new(deps, &config, RetryPolicy::default())
    }

    pub fn control(&self) -> TaskControl {
        TaskControl::new(self.store.clone(), self.dispatcher.clone())
    }

    /// No attempt directories or files left in the worker root.
    pub fn work_dir_is_empty(&self) -> bool {
        std::fs::read_dir(self.work_dir.path()).unwrap().next().is_none()
    }
}
