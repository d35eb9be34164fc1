//! Replace or mix a video's audio track with another audio file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use mforge_models::OperationKind;

use super::video_extension;
use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::processor::{output_map, ConfigReader, OperationProcessor, ProcessOutput, ProcessorContext};

const MAX_VOLUME: f64 = 10.0;

#[derive(Debug)]
struct AudioParams {
    video: PathBuf,
    audio: PathBuf,
    volume: f64,
    /// Mix with the original track instead of replacing it
    mix: bool,
    offset_secs: f64,
}

pub struct AudioOverlayProcessor {
    config: Map<String, Value>,
    ctx: ProcessorContext,
}

impl AudioOverlayProcessor {
    pub fn new(config: Map<String, Value>, ctx: ProcessorContext) -> Self {
        Self { config, ctx }
    }

    fn params(&self) -> MediaResult<AudioParams> {
        let reader = ConfigReader::new(OperationKind::AudioOverlay, &self.config);
        let volume = reader.optional_f64("volume")?.unwrap_or(1.0);
        if !(0.0..=MAX_VOLUME).contains(&volume) {
            return Err(reader.invalid(format!("volume must be between 0 and {}", MAX_VOLUME)));
        }
        let offset_secs = reader.optional_f64("start_time")?.unwrap_or(0.0);
        if offset_secs < 0.0 {
            return Err(reader.invalid("start_time must not be negative"));
        }
        Ok(AudioParams {
            video: reader.require_file("video_path")?,
            audio: reader.require_file("audio_path")?,
            volume,
            mix: reader.optional_bool("mix")?.unwrap_or(false),
            offset_secs,
        })
    }

    fn command(params: &AudioParams, output: &Path) -> FfmpegCommand {
        let delay_ms = (params.offset_secs * 1000.0).round() as u64;
        let prepared = format!("[1:a]adelay={}:all=1,volume={:.2}", delay_ms, params.volume);
        let filter = if params.mix {
            format!(
                "{}[ov];[0:a][ov]amix=inputs=2:duration=first:dropout_transition=0[aout]",
                prepared
            )
        } else {
            format!("{}[aout]", prepared)
        };

        let cmd = FfmpegCommand::new(&params.video, output)
            .input(&params.audio)
            .filter_complex(filter)
            .map("0:v")
            .map("[aout]")
            .video_codec("copy")
            .audio_codec("aac");
        if params.mix {
            cmd
        } else {
            cmd.shortest()
        }
    }
}

#[async_trait]
impl OperationProcessor for AudioOverlayProcessor {
    fn kind(&self) -> OperationKind {
        OperationKind::AudioOverlay
    }

    async fn validate(&self) -> MediaResult<()> {
        self.params().map(|_| ())
    }

    async fn process(&self) -> MediaResult<ProcessOutput> {
        let params = self.params()?;
        let output = self
            .ctx
            .output_path(OperationKind::AudioOverlay, &video_extension(&params.video));
        self.ctx.run(&Self::command(&params, &output)).await?;

        info!(mix = params.mix, output = %output.display(), "Applied audio overlay");
        Ok(output_map(&output))
    }
}
