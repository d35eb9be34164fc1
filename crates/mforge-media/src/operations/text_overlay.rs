//! Burn text into a video with `drawtext`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use mforge_models::OperationKind;

use super::{check_filter_token, encode_video, escape_filter_path, unsafe_value, video_extension};
use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::processor::{
    enable_expr, ensure_file, output_map, ConfigReader, OperationProcessor, ProcessOutput, ProcessorContext,
};

const MAX_TEXT_LEN: usize = 2000;

#[derive(Debug)]
struct TextParams {
    video: PathBuf,
    text: String,
    font_size: u32,
    font_color: String,
    x: String,
    y: String,
    boxed: bool,
    font_file: Option<PathBuf>,
    window: Option<(f64, Option<f64>)>,
}

pub struct TextOverlayProcessor {
    config: Map<String, Value>,
    ctx: ProcessorContext,
    scratch: Mutex<Vec<PathBuf>>,
}

impl TextOverlayProcessor {
    pub fn new(config: Map<String, Value>, ctx: ProcessorContext) -> Self {
        Self {
            config,
            ctx,
            scratch: Mutex::new(Vec::new()),
        }
    }

    fn params(&self) -> MediaResult<TextParams> {
        let kind = OperationKind::TextOverlay;
        let reader = ConfigReader::new(kind, &self.config);

        let text = reader.require_str("text")?;
        if text.chars().count() > MAX_TEXT_LEN {
            return Err(reader.invalid(format!("text exceeds {} characters", MAX_TEXT_LEN)));
        }

        let font_size = reader.optional_f64("font_size")?.unwrap_or(48.0);
        if !(1.0..=512.0).contains(&font_size) {
            return Err(reader.invalid("font_size must be between 1 and 512"));
        }

        let font_color = reader.optional_str("font_color")?.unwrap_or("white").to_string();
        if !check_filter_token(&font_color, &['@', '#']) {
            return Err(unsafe_value(kind, "font_color"));
        }
        let x = reader.optional_str("x")?.unwrap_or("(w-text_w)/2").to_string();
        if !check_filter_token(&x, &[]) {
            return Err(unsafe_value(kind, "x"));
        }
        let y = reader.optional_str("y")?.unwrap_or("h-text_h-50").to_string();
        if !check_filter_token(&y, &[]) {
            return Err(unsafe_value(kind, "y"));
        }

        let font_file = match reader.optional_str("font_file")? {
            Some(path) => {
                let path = PathBuf::from(path);
                ensure_file(&path)?;
                Some(path)
            }
            None => None,
        };

        Ok(TextParams {
            video: reader.require_file("video_path")?,
            text: text.to_string(),
            font_size: font_size.round() as u32,
            font_color,
            x,
            y,
            boxed: reader.optional_bool("box")?.unwrap_or(false),
            font_file,
            window: reader.time_window()?,
        })
    }

    fn filter(params: &TextParams, text_file: &Path) -> String {
        let mut filter = format!(
            "drawtext=textfile='{}':fontsize={}:fontcolor={}:x={}:y={}",
            escape_filter_path(text_file),
            params.font_size,
            params.font_color,
            params.x,
            params.y
        );
        if let Some(font) = &params.font_file {
            filter.push_str(&format!(":fontfile='{}'", escape_filter_path(font)));
        }
        if params.boxed {
            filter.push_str(":box=1:boxcolor=black@0.5:boxborderw=10");
        }
        if let Some(expr) = enable_expr(params.window) {
            filter.push_str(&format!(":enable='{}'", expr));
        }
        filter
    }
}

#[async_trait]
impl OperationProcessor for TextOverlayProcessor {
    fn kind(&self) -> OperationKind {
        OperationKind::TextOverlay
    }

    async fn validate(&self) -> MediaResult<()> {
        self.params().map(|_| ())
    }

    async fn process(&self) -> MediaResult<ProcessOutput> {
        let params = self.params()?;

        // Text goes through a file so it never needs filter escaping.
        let text_file = self.ctx.work_dir.join(format!("text_{}.txt", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&text_file, &params.text).await?;
        if let Ok(mut scratch) = self.scratch.lock() {
            scratch.push(text_file.clone());
        }

        let output = self
            .ctx
            .output_path(OperationKind::TextOverlay, &video_extension(&params.video));
        let cmd = encode_video(
            FfmpegCommand::new(&params.video, &output).video_filter(Self::filter(&params, &text_file)),
        )
        .audio_codec("copy");
        self.ctx.run(&cmd).await?;

        info!(output = %output.display(), "Applied text overlay");
        Ok(output_map(&output))
    }

    async fn cleanup(&self) {
        let paths = match self.scratch.lock() {
            Ok(mut scratch) => std::mem::take(&mut *scratch),
            Err(_) => return,
        };
        for path in paths {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("Failed to remove text file {}: {}", path.display(), e);
            }
        }
    }
}
