// Speech recognition collaborator.
//
// To add a recognizer:
// 1. Define serde structs for its output
// 2. Implement TranscriptionMapper for them
// 3. Implement Transcriber and return it from the factory

pub mod common;
pub mod whisper_cpp;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use common::*;
use crate::config::AsrConfig;
use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Ordered `{start, end, text}` segments for an audio file.
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript>;

    fn name(&self) -> String;
}

pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create(config: AsrConfig) -> Arc<dyn Transcriber> {
        Arc::new(whisper_cpp::WhisperCppTranscriber::new(config))
    }
}
