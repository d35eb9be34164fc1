#![deny(unreachable_patterns)]
//! FFmpeg-backed media operations.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with per-invocation timeout
//! - The `OperationProcessor` contract (validate → process → cleanup)
//! - Processors for join, audio overlay, text overlay, subtitles and video overlay
//! - A closed registry over `OperationKind`
//! - Stage config wiring for source paths, auxiliary inputs and results

pub mod command;
pub mod error;
pub mod injection;
pub mod operations;
pub mod processor;
pub mod registry;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use injection::{
    attach_auxiliary, auxiliary_inputs, extract_output_path, inject_source, source_key, AuxiliaryInput,
    RESULT_PATH_KEYS,
};
pub use processor::{OperationProcessor, ProcessOutput, ProcessorContext};
pub use registry::{FfmpegRegistry, OperationRegistry};
