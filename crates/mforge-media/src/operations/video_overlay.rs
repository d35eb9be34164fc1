//! Place one video (or image) over another.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use mforge_models::OperationKind;

use super::{check_filter_token, encode_video, unsafe_value, video_extension};
use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::processor::{
    enable_expr, output_map, ConfigReader, OperationProcessor, ProcessOutput, ProcessorContext,
};

#[derive(Debug)]
struct OverlayParams {
    base: PathBuf,
    overlay: PathBuf,
    x: String,
    y: String,
    width: Option<u32>,
    opacity: f64,
    window: Option<(f64, Option<f64>)>,
}

pub struct VideoOverlayProcessor {
    config: Map<String, Value>,
    ctx: ProcessorContext,
}

impl VideoOverlayProcessor {
    pub fn new(config: Map<String, Value>, ctx: ProcessorContext) -> Self {
        Self { config, ctx }
    }

    fn params(&self) -> MediaResult<OverlayParams> {
        let kind = OperationKind::VideoOverlay;
        let reader = ConfigReader::new(kind, &self.config);

        let x = reader.optional_str("x")?.unwrap_or("W-w-10").to_string();
        if !check_filter_token(&x, &[]) {
            return Err(unsafe_value(kind, "x"));
        }
        let y = reader.optional_str("y")?.unwrap_or("10").to_string();
        if !check_filter_token(&y, &[]) {
            return Err(unsafe_value(kind, "y"));
        }

        let width = match reader.optional_f64("width")? {
            Some(w) if (2.0..=7680.0).contains(&w) => Some(w.round() as u32),
            Some(_) => return Err(reader.invalid("width must be between 2 and 7680")),
            None => None,
        };
        let opacity = reader.optional_f64("opacity")?.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&opacity) {
            return Err(reader.invalid("opacity must be between 0 and 1"));
        }

        Ok(OverlayParams {
            base: reader.require_file("base_video_path")?,
            overlay: reader.require_file("overlay_path")?,
            x,
            y,
            width,
            opacity,
            window: reader.time_window()?,
        })
    }

    fn filter(params: &OverlayParams) -> String {
        let mut prep = Vec::new();
        if let Some(w) = params.width {
            prep.push(format!("scale={}:-2", w));
        }
        if params.opacity < 1.0 {
            prep.push(format!("format=rgba,colorchannelmixer=aa={:.2}", params.opacity));
        }

        let (head, overlay_label) = if prep.is_empty() {
            (String::new(), "[1:v]")
        } else {
            (format!("[1:v]{}[ov];", prep.join(",")), "[ov]")
        };

        let mut overlay = format!(
            "{}[0:v]{}overlay={}:{}:eof_action=pass:format=auto",
            head, overlay_label, params.x, params.y
        );
        if let Some(expr) = enable_expr(params.window) {
            overlay.push_str(&format!(":enable='{}'", expr));
        }
        overlay.push_str("[vout]");
        overlay
    }

    fn command(params: &OverlayParams, output: &Path) -> FfmpegCommand {
        let cmd = FfmpegCommand::new(&params.base, output)
            .input(&params.overlay)
            .filter_complex(Self::filter(params))
            .map("[vout]")
            .map("0:a?");
        encode_video(cmd).audio_codec("copy")
    }
}

#[async_trait]
impl OperationProcessor for VideoOverlayProcessor {
    fn kind(&self) -> OperationKind {
        OperationKind::VideoOverlay
    }

    async fn validate(&self) -> MediaResult<()> {
        self.params().map(|_| ())
    }

    async fn process(&self) -> MediaResult<ProcessOutput> {
        let params = self.params()?;
        let output = self
            .ctx
            .output_path(OperationKind::VideoOverlay, &video_extension(&params.base));
        self.ctx.run(&Self::command(&params, &output)).await?;

        info!(output = %output.display(), "Applied video overlay");
        Ok(output_map(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> OverlayParams {
        OverlayParams {
            base: PathBuf::from("/w/base.mp4"),
            overlay: PathBuf::from("/w/logo.png"),
            x: "W-w-10".to_string(),
            y: "10".to_string(),
            width: None,
            opacity: 1.0,
            window: None,
        }
    }

    #[test]
    fn test_plain_overlay_filter() {
        assert_eq!(
            VideoOverlayProcessor::filter(&params()),
            "[0:v][1:v]overlay=W-w-10:10:eof_action=pass:format=auto[vout]"
        );
    }

    #[test]
    fn test_scaled_translucent_overlay_filter() {
        let p = OverlayParams {
            width: Some(320),
            opacity: 0.7,
            window: Some((2.0, None)),
            ..params()
        };
        assert_eq!(
            VideoOverlayProcessor::filter(&p),
            "[1:v]scale=320:-2,format=rgba,colorchannelmixer=aa=0.70[ov];\
             [0:v][ov]overlay=W-w-10:10:eof_action=pass:format=auto:enable='gte(t,2.000)'[vout]"
        );
    }

    #[test]
    fn test_command_maps_optional_audio() {
        let args = VideoOverlayProcessor::command(&params(), Path::new("/w/out.mp4")).build_args();
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:a?"));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
    }
}
