// Media collaborator: audio extraction and subtitle delivery.
//
// - Processor: ffmpeg-backed implementation of the trait below
// - Commands: external tool invocation and ffmpeg argument builders

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;

pub const AUDIO_EXTENSIONS: &[&str] = &["flac", "mp3", "wav", "m4a", "mka"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Classify an input by extension; anything else is unsupported.
pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Audio)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProcessorTrait: Send + Sync {
    /// Produce the audio file the recognizer reads, inside `workdir`.
    async fn extract_audio(&self, input: &Path, workdir: &Path, mono: bool) -> Result<PathBuf>;

    /// Copy every stream of `video` and add one subtitle track per `(file, lang)`.
    async fn soft_mux(&self, video: &Path, subtitles: &[(PathBuf, String)], output: &Path) -> Result<PathBuf>;

    /// Re-encode `video` with `subtitle` rendered into the picture.
    async fn hard_burn(&self, video: &Path, subtitle: &Path, output: &Path) -> Result<PathBuf>;

    /// Place `subtitle` next to the video as `<stem>.<lang>.<ext>` in `out_dir`.
    async fn sidecar(&self, video: &Path, subtitle: &Path, lang: &str, out_dir: &Path) -> Result<PathBuf>;

    async fn check_availability(&self) -> Result<String>;
}

pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    pub fn create_processor(config: MediaConfig) -> Arc<dyn MediaProcessorTrait> {
        Arc::new(processor::MediaProcessorImpl::new(config))
    }
}
