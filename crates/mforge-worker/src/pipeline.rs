//! Pipeline composer.
//!
//! A task is turned into an ordered list of stages over one base file.
//! Combined tasks carry 2 to 10 stages; simple tasks are a single stage.
//! Planning validates the config and resolves every referenced file record
//! before anything is downloaded. Running a plan threads one working file
//! through the stages, each stage consuming the previous output.
//!
//! Every local file the run creates is tracked. Superseded files are
//! deleted as soon as the next stage succeeds; on failure everything still
//! tracked is deleted and the stage error is returned unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use mforge_media::{
    attach_auxiliary, auxiliary_inputs, extract_output_path, inject_source, source_key, AuxiliaryInput,
    OperationRegistry, ProcessorContext,
};
use mforge_models::result::{combined_result, simple_result};
use mforge_models::{CombinedConfig, FileId, FileRecord, OperationKind, Task, TaskId, TaskType};
use mforge_store::JobStore;

use crate::error::{WorkerError, WorkerResult};
use crate::materializer::Materializer;

/// One resolved stage.
#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub kind: OperationKind,
    pub config: Map<String, Value>,
    /// Extra stored inputs with their resolved records
    pub auxiliaries: Vec<(AuxiliaryInput, FileRecord)>,
}

/// Validated execution plan for a task.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub base: FileRecord,
    pub stages: Vec<PlannedStage>,
    combined: bool,
}

impl PipelinePlan {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Result payload stored on the task once `file_id` is published.
    pub fn result_payload(&self, file_id: FileId) -> Value {
        match self.stages.first() {
            Some(stage) if !self.combined => simple_result(file_id, stage.kind),
            _ => combined_result(file_id, self.stages.len()),
        }
    }
}

/// Local files owned by one run.
#[derive(Debug, Default)]
struct TrackedFiles {
    paths: Vec<PathBuf>,
}

impl TrackedFiles {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Delete a file that is no longer needed.
    async fn release(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
        remove_quietly(path).await;
    }

    /// Stop tracking a file that outlives the run.
    fn keep(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    async fn remove_all(&mut self) {
        for path in self.paths.drain(..) {
            remove_quietly(&path).await;
        }
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed working file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove working file: {}", e),
    }
}

/// Runs stage chains for tasks.
pub struct PipelineComposer {
    materializer: Arc<Materializer>,
    registry: Arc<dyn OperationRegistry>,
    store: Arc<dyn JobStore>,
}

impl PipelineComposer {
    pub fn new(materializer: Arc<Materializer>, registry: Arc<dyn OperationRegistry>, store: Arc<dyn JobStore>) -> Self {
        Self {
            materializer,
            registry,
            store,
        }
    }

    /// Validate a task's config and resolve its files. Performs no downloads.
    pub async fn plan(&self, task: &Task) -> WorkerResult<PipelinePlan> {
        let (base_id, descriptors) = match task.task_type.operation() {
            None => {
                let combined = CombinedConfig::parse(&task.config, task.base_input())?;
                let stages = combined
                    .operations
                    .into_iter()
                    .map(|op| (op.kind, op.config, Vec::new()))
                    .collect::<Vec<_>>();
                (combined.base_file_id, stages)
            }
            Some(kind) => {
                let base = task
                    .base_input()
                    .ok_or_else(|| WorkerError::validation(format!("{} task has no input files", kind)))?;
                let config = match &task.config {
                    Value::Object(map) => map.clone(),
                    Value::Null => Map::new(),
                    _ => return Err(WorkerError::validation(format!("{} config must be an object", kind))),
                };
                let extra_inputs = if kind == OperationKind::Join {
                    task.input_files
                        .iter()
                        .skip(1)
                        .map(|file_id| AuxiliaryInput {
                            file_id: *file_id,
                            target_key: source_key(OperationKind::Join),
                        })
                        .collect()
                } else {
                    Vec::new()
                };
                (base, vec![(kind, config, extra_inputs)])
            }
        };

        let base = self.materializer.resolve(&task.owner_id, base_id).await?;

        let mut stages = Vec::with_capacity(descriptors.len());
        for (kind, config, mut inputs) in descriptors {
            inputs.extend(auxiliary_inputs(kind, &config)?);
            let mut auxiliaries = Vec::with_capacity(inputs.len());
            for input in inputs {
                let record = self.materializer.resolve(&task.owner_id, input.file_id).await?;
                auxiliaries.push((input, record));
            }
            stages.push(PlannedStage {
                kind,
                config,
                auxiliaries,
            });
        }

        Ok(PipelinePlan {
            base,
            stages,
            combined: task.task_type == TaskType::Combined,
        })
    }

    /// Execute a plan inside `ctx.work_dir`, returning the final working file.
    ///
    /// The returned file is the only one left on disk; the caller owns it.
    pub async fn run(&self, task_id: TaskId, plan: &PipelinePlan, ctx: &ProcessorContext) -> WorkerResult<PathBuf> {
        let mut files = TrackedFiles::default();
        match self.run_stages(task_id, plan, ctx, &mut files).await {
            Ok(path) => {
                files.keep(&path);
                files.remove_all().await;
                Ok(path)
            }
            Err(e) => {
                files.remove_all().await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        task_id: TaskId,
        plan: &PipelinePlan,
        ctx: &ProcessorContext,
        files: &mut TrackedFiles,
    ) -> WorkerResult<PathBuf> {
        let total = plan.len();
        if total == 0 {
            return Err(WorkerError::validation("Pipeline has no stages"));
        }

        let mut current = self.materializer.materialize(&plan.base, &ctx.work_dir).await?;
        files.track(current.clone());

        for (index, stage) in plan.stages.iter().enumerate() {
            self.report_progress(task_id, index as f64 / total as f64 * 100.0).await;
            debug!(task_id = %task_id, stage = index + 1, total, operation = %stage.kind, "Running stage");

            let mut config = stage.config.clone();
            let mut stage_inputs = Vec::with_capacity(stage.auxiliaries.len());
            for (input, record) in &stage.auxiliaries {
                let path = self.materializer.materialize(record, &ctx.work_dir).await?;
                files.track(path.clone());
                attach_auxiliary(stage.kind, &mut config, input, &path)?;
                stage_inputs.push(path);
            }
            inject_source(stage.kind, &mut config, &current)?;

            let output = match self.run_processor(stage.kind, config, ctx).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(task_id = %task_id, stage = index + 1, operation = %stage.kind, "Stage failed: {}", e);
                    return Err(e);
                }
            };
            files.track(output.clone());

            files.release(&current).await;
            for path in &stage_inputs {
                files.release(path).await;
            }
            current = output;

            metrics::counter!("mforge_pipeline_stages_total", "operation" => stage.kind.as_str()).increment(1);
        }

        self.report_progress(task_id, 100.0).await;
        info!(task_id = %task_id, stages = total, "Pipeline finished");
        Ok(current)
    }

    async fn run_processor(
        &self,
        kind: OperationKind,
        config: Map<String, Value>,
        ctx: &ProcessorContext,
    ) -> WorkerResult<PathBuf> {
        let processor = self.registry.create(kind, config, ctx)?;
        let result = match processor.validate().await {
            Ok(()) => processor.process().await,
            Err(e) => Err(e),
        };
        processor.cleanup().await;

        let output = result?;
        extract_output_path(&output)
            .ok_or_else(|| WorkerError::processing(format!("{} stage returned no output file", kind)))
    }

    async fn report_progress(&self, task_id: TaskId, progress: f64) {
        if let Err(e) = self.store.set_progress(task_id, progress).await {
            warn!(task_id = %task_id, progress, "Failed to record progress: {}", e);
        }
    }
}
