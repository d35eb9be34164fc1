//! Closed registry mapping operation kinds to processors.

use serde_json::{Map, Value};

use mforge_models::OperationKind;

use crate::error::MediaResult;
use crate::operations::{
    AudioOverlayProcessor, JoinProcessor, SubtitlesProcessor, TextOverlayProcessor, VideoOverlayProcessor,
};
use crate::processor::{OperationProcessor, ProcessorContext};

/// Builds a processor for one stage.
pub trait OperationRegistry: Send + Sync {
    fn create(
        &self,
        kind: OperationKind,
        config: Map<String, Value>,
        ctx: &ProcessorContext,
    ) -> MediaResult<Box<dyn OperationProcessor>>;
}

/// Registry of the FFmpeg processors.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegRegistry;

impl FfmpegRegistry {
    pub fn new() -> Self {
        Self
    }
}

impl OperationRegistry for FfmpegRegistry {
    fn create(
        &self,
        kind: OperationKind,
        config: Map<String, Value>,
        ctx: &ProcessorContext,
    ) -> MediaResult<Box<dyn OperationProcessor>> {
        let ctx = ctx.clone();
        Ok(match kind {
            OperationKind::Join => Box::new(JoinProcessor::new(config, ctx)),
            OperationKind::AudioOverlay => Box::new(AudioOverlayProcessor::new(config, ctx)),
            OperationKind::TextOverlay => Box::new(TextOverlayProcessor::new(config, ctx)),
            OperationKind::Subtitles => Box::new(SubtitlesProcessor::new(config, ctx)),
            OperationKind::VideoOverlay => Box::new(VideoOverlayProcessor::new(config, ctx)),
        })
    }
}
