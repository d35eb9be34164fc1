//! Operation processor contract.
//!
//! A processor is built from one stage config, then driven through
//! `validate → process → cleanup`. `process` returns a result map whose
//! output-path entry names a file inside the context's working directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use mforge_models::OperationKind;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Result keys returned by `process`.
pub type ProcessOutput = Map<String, Value>;

/// Per-invocation resources handed to a processor.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    /// Directory owned by the current attempt; outputs go here
    pub work_dir: PathBuf,
    /// Upper bound for one FFmpeg invocation
    pub timeout: Duration,
}

impl ProcessorContext {
    pub fn new(work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            work_dir: work_dir.into(),
            timeout,
        }
    }

    /// Fresh output path for an operation.
    pub fn output_path(&self, kind: OperationKind, extension: &str) -> PathBuf {
        self.work_dir
            .join(format!("{}_{}.{}", kind.as_str(), uuid::Uuid::new_v4().simple(), extension))
    }

    pub fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new().with_timeout(self.timeout)
    }

    /// Run `cmd`, removing its partial output on failure.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let result = self.runner().run(cmd).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(cmd.output_path()).await;
        }
        result
    }
}

/// One media transform.
#[async_trait]
pub trait OperationProcessor: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Reject invalid input before any work is done.
    async fn validate(&self) -> MediaResult<()>;

    /// Run the transform.
    async fn process(&self) -> MediaResult<ProcessOutput>;

    /// Release scratch resources. Never fails.
    async fn cleanup(&self) {}
}

/// Typed view over a stage config.
pub(crate) struct ConfigReader<'a> {
    kind: OperationKind,
    config: &'a Map<String, Value>,
}

impl<'a> ConfigReader<'a> {
    pub(crate) fn new(kind: OperationKind, config: &'a Map<String, Value>) -> Self {
        Self { kind, config }
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> MediaError {
        MediaError::invalid_config(self.kind, reason)
    }

    pub(crate) fn require_str(&self, key: &str) -> MediaResult<&'a str> {
        match self.config.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
            Some(Value::String(_)) => Err(self.invalid(format!("{} is empty", key))),
            Some(_) => Err(self.invalid(format!("{} must be a string", key))),
            None => Err(self.invalid(format!("missing {}", key))),
        }
    }

    pub(crate) fn optional_str(&self, key: &str) -> MediaResult<Option<&'a str>> {
        match self.config.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.invalid(format!("{} must be a string", key))),
        }
    }

    /// Numbers may arrive as JSON numbers or numeric strings.
    pub(crate) fn optional_f64(&self, key: &str) -> MediaResult<Option<f64>> {
        match self.config.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("{} is not a finite number", key))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.invalid(format!("{} must be a number", key))),
            Some(_) => Err(self.invalid(format!("{} must be a number", key))),
        }
    }

    pub(crate) fn optional_bool(&self, key: &str) -> MediaResult<Option<bool>> {
        match self.config.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(self.invalid(format!("{} must be a boolean", key))),
        }
    }

    /// Path that must point at an existing file.
    pub(crate) fn require_file(&self, key: &str) -> MediaResult<PathBuf> {
        let path = PathBuf::from(self.require_str(key)?);
        ensure_file(&path)?;
        Ok(path)
    }

    pub(crate) fn require_path_list(&self, key: &str) -> MediaResult<Vec<PathBuf>> {
        let items = match self.config.get(key) {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(self.invalid(format!("{} must be a list", key))),
            None => return Err(self.invalid(format!("missing {}", key))),
        };
        items
            .iter()
            .map(|v| {
                v.as_str()
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .ok_or_else(|| self.invalid(format!("{} entries must be paths", key)))
            })
            .collect()
    }

    /// Optional `[start_time, end_time]` window in seconds.
    pub(crate) fn time_window(&self) -> MediaResult<Option<(f64, Option<f64>)>> {
        let start = self.optional_f64("start_time")?;
        let end = self.optional_f64("end_time")?;
        if start.is_some_and(|s| s < 0.0) {
            return Err(self.invalid("start_time must not be negative"));
        }
        if let (Some(s), Some(e)) = (start, end) {
            if e <= s {
                return Err(self.invalid("end_time must be after start_time"));
            }
        }
        Ok(match (start, end) {
            (None, None) => None,
            (s, e) => Some((s.unwrap_or(0.0), e)),
        })
    }
}

pub(crate) fn ensure_file(path: &Path) -> MediaResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }
}

/// FFmpeg `enable=` expression for a time window.
pub(crate) fn enable_expr(window: Option<(f64, Option<f64>)>) -> Option<String> {
    window.map(|(start, end)| match end {
        Some(end) => format!("between(t,{:.3},{:.3})", start, end),
        None => format!("gte(t,{:.3})", start),
    })
}

/// Output map with the produced path under `output_path`.
pub(crate) fn output_map(path: &Path) -> ProcessOutput {
    let mut out = Map::new();
    out.insert("output_path".to_string(), Value::String(path.to_string_lossy().into_owned()));
    out
}
