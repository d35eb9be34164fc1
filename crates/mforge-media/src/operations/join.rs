//! Concatenate videos with the concat demuxer.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use mforge_models::OperationKind;

use super::{encode_video, video_extension};
use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::processor::{ensure_file, output_map, ConfigReader, OperationProcessor, ProcessOutput, ProcessorContext};

struct JoinParams {
    inputs: Vec<PathBuf>,
    reencode: bool,
}

pub struct JoinProcessor {
    config: Map<String, Value>,
    ctx: ProcessorContext,
    scratch: Mutex<Vec<PathBuf>>,
}

impl JoinProcessor {
    pub fn new(config: Map<String, Value>, ctx: ProcessorContext) -> Self {
        Self {
            config,
            ctx,
            scratch: Mutex::new(Vec::new()),
        }
    }

    fn params(&self) -> MediaResult<JoinParams> {
        let reader = ConfigReader::new(OperationKind::Join, &self.config);
        let inputs = reader.require_path_list("input_paths")?;
        if inputs.len() < 2 {
            return Err(reader.invalid("input_paths needs at least 2 entries"));
        }
        for input in &inputs {
            ensure_file(input)?;
        }
        Ok(JoinParams {
            inputs,
            reencode: reader.optional_bool("reencode")?.unwrap_or(false),
        })
    }

    fn command(&self, list_path: &Path, output: &Path, reencode: bool) -> FfmpegCommand {
        let cmd = FfmpegCommand::concat(list_path, output);
        if reencode {
            encode_video(cmd).audio_codec("aac")
        } else {
            cmd.output_args(["-c", "copy"])
        }
    }
}

/// Concat demuxer list body for `inputs`.
fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

#[async_trait]
impl OperationProcessor for JoinProcessor {
    fn kind(&self) -> OperationKind {
        OperationKind::Join
    }

    async fn validate(&self) -> MediaResult<()> {
        self.params().map(|_| ())
    }

    async fn process(&self) -> MediaResult<ProcessOutput> {
        let params = self.params()?;
        let list_path = self.ctx.work_dir.join(format!("concat_{}.txt", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&list_path, concat_list(&params.inputs)).await?;
        if let Ok(mut scratch) = self.scratch.lock() {
            scratch.push(list_path.clone());
        }

        let output = self
            .ctx
            .output_path(OperationKind::Join, &video_extension(&params.inputs[0]));
        let cmd = self.command(&list_path, &output, params.reencode);
        self.ctx.run(&cmd).await?;

        info!(inputs = params.inputs.len(), output = %output.display(), "Joined videos");
        let mut out = output_map(&output);
        out.insert("inputs_count".to_string(), Value::from(params.inputs.len()));
        Ok(out)
    }

    async fn cleanup(&self) {
        let paths = match self.scratch.lock() {
            Ok(mut scratch) => std::mem::take(&mut *scratch),
            Err(_) => return,
        };
        for path in paths {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("Failed to remove concat list {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn processor(dir: &Path, config: Value) -> JoinProcessor {
        JoinProcessor::new(
            config.as_object().cloned().unwrap(),
            ProcessorContext::new(dir, Duration::from_secs(10)),
        )
    }

    #[tokio::test]
    async fn test_validate_requires_two_existing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let ok = processor(dir.path(), json!({"input_paths": [a, b]}));
        assert!(ok.validate().await.is_ok());

        let single = processor(dir.path(), json!({"input_paths": [a]}));
        assert!(single.validate().await.unwrap_err().is_validation());

        let missing = processor(dir.path(), json!({"input_paths": [a, dir.path().join("gone.mp4")]}));
        assert!(missing.validate().await.unwrap_err().is_validation());
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/w/a.mp4"), PathBuf::from("/w/it's.mp4")]);
        assert_eq!(list, "file '/w/a.mp4'\nfile '/w/it'\\''s.mp4'\n");
    }

    #[test]
    fn test_stream_copy_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let p = processor(dir.path(), json!({}));
        let args = p.command(Path::new("list.txt"), Path::new("out.mp4"), false).build_args();
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "concat"));
        assert!(args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));

        let args = p.command(Path::new("list.txt"), Path::new("out.mp4"), true).build_args();
        assert!(args.contains(&"libx264".to_string()));
    }
}
