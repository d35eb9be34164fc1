//! FFmpeg-backed processors, one per operation kind.

use std::path::Path;

use crate::command::FfmpegCommand;
use crate::error::MediaError;

pub mod audio_overlay;
pub mod join;
pub mod subtitles;
pub mod text_overlay;
pub mod video_overlay;

pub use audio_overlay::AudioOverlayProcessor;
pub use join::JoinProcessor;
pub use subtitles::SubtitlesProcessor;
pub use text_overlay::TextOverlayProcessor;
pub use video_overlay::VideoOverlayProcessor;

/// Container extension of `path`, falling back to mp4.
pub(crate) fn video_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "mp4".to_string())
}

/// Standard H.264 re-encode for filtered video.
pub(crate) fn encode_video(cmd: FfmpegCommand) -> FfmpegCommand {
    cmd.video_codec("libx264").preset("veryfast").crf(20)
}

/// Escape a path for use inside a quoted filter option.
pub(crate) fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(':', "\\:")
}

/// Allow only characters that cannot break out of a filter option.
pub(crate) fn check_filter_token(value: &str, extra: &[char]) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_+-*/(). ".contains(c) || extra.contains(&c))
}

/// Error for a config value that contains unsafe characters.
pub(crate) fn unsafe_value(operation: mforge_models::OperationKind, key: &str) -> MediaError {
    MediaError::invalid_config(operation, format!("{} contains unsupported characters", key))
}
