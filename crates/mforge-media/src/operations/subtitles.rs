//! Burn a subtitle file into a video.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use mforge_models::OperationKind;

use super::{encode_video, escape_filter_path, unsafe_value, video_extension};
use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::processor::{output_map, ConfigReader, OperationProcessor, ProcessOutput, ProcessorContext};

const SUBTITLE_EXTENSIONS: [&str; 4] = ["srt", "ass", "ssa", "vtt"];

#[derive(Debug)]
struct SubtitleParams {
    video: PathBuf,
    subtitles: PathBuf,
    force_style: Option<String>,
}

pub struct SubtitlesProcessor {
    config: Map<String, Value>,
    ctx: ProcessorContext,
}

impl SubtitlesProcessor {
    pub fn new(config: Map<String, Value>, ctx: ProcessorContext) -> Self {
        Self { config, ctx }
    }

    fn params(&self) -> MediaResult<SubtitleParams> {
        let kind = OperationKind::Subtitles;
        let reader = ConfigReader::new(kind, &self.config);

        let subtitles = reader.require_file("subtitle_path")?;
        let ext = subtitles
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !SUBTITLE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(reader.invalid(format!("unsupported subtitle format '{}'", ext)));
        }

        let force_style = reader.optional_str("force_style")?.map(str::to_string);
        if let Some(style) = &force_style {
            if style.chars().any(|c| matches!(c, '\'' | '\\' | ';' | '[' | ']' | ':')) {
                return Err(unsafe_value(kind, "force_style"));
            }
        }

        Ok(SubtitleParams {
            video: reader.require_file("video_path")?,
            subtitles,
            force_style,
        })
    }

    fn filter(params: &SubtitleParams) -> String {
        let mut filter = format!("subtitles='{}'", escape_filter_path(&params.subtitles));
        if let Some(style) = &params.force_style {
            filter.push_str(&format!(":force_style='{}'", style));
        }
        filter
    }

    fn command(params: &SubtitleParams, output: &Path) -> FfmpegCommand {
        encode_video(FfmpegCommand::new(&params.video, output).video_filter(Self::filter(params))).audio_codec("copy")
    }
}

#[async_trait]
impl OperationProcessor for SubtitlesProcessor {
    fn kind(&self) -> OperationKind {
        OperationKind::Subtitles
    }

    async fn validate(&self) -> MediaResult<()> {
        self.params().map(|_| ())
    }

    async fn process(&self) -> MediaResult<ProcessOutput> {
        let params = self.params()?;
        let output = self
            .ctx
            .output_path(OperationKind::Subtitles, &video_extension(&params.video));
        self.ctx.run(&Self::command(&params, &output)).await?;

        info!(output = %output.display(), "Burned subtitles");
        Ok(output_map(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn processor(dir: &Path, config: Value) -> SubtitlesProcessor {
        SubtitlesProcessor::new(
            config.as_object().cloned().unwrap(),
            ProcessorContext::new(dir, Duration::from_secs(10)),
        )
    }

    #[tokio::test]
    async fn test_validate_subtitle_format() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("v.mp4");
        let srt = dir.path().join("s.srt");
        let doc = dir.path().join("s.docx");
        for p in [&video, &srt, &doc] {
            std::fs::write(p, b"x").unwrap();
        }

        assert!(processor(dir.path(), json!({"video_path": video, "subtitle_path": srt}))
            .validate()
            .await
            .is_ok());
        assert!(processor(dir.path(), json!({"video_path": video, "subtitle_path": doc}))
            .validate()
            .await
            .unwrap_err()
            .is_validation());
        assert!(processor(
            dir.path(),
            json!({"video_path": video, "subtitle_path": srt, "force_style": "x';evil"})
        )
        .validate()
        .await
        .is_err());
    }

    #[test]
    fn test_filter_with_style() {
        let params = SubtitleParams {
            video: PathBuf::from("/w/v.mp4"),
            subtitles: PathBuf::from("/w/s.srt"),
            force_style: Some("FontSize=24,PrimaryColour=&H00FFFFFF".to_string()),
        };
        assert_eq!(
            SubtitlesProcessor::filter(&params),
            "subtitles='/w/s.srt':force_style='FontSize=24,PrimaryColour=&H00FFFFFF'"
        );
        let args = SubtitlesProcessor::command(&params, Path::new("/w/out.mp4")).build_args();
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "copy"));
    }
}
