use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::AsrConfig;
use crate::error::{Jp2SubsError, Result};
use crate::master::RawSegment;

/// Recognizer output in a service-agnostic shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<RawSegment>,
    pub language: String,
    /// e.g. `whisper.cpp ggml-large-v3.bin`
    pub model_info: String,
}

impl Transcript {
    pub fn duration(&self) -> f64 {
        self.segments.iter().map(|s| s.end).fold(0.0, f64::max)
    }
}

/// Converts a service-specific output format into a `Transcript`
pub trait TranscriptionMapper<T> {
    fn to_transcript(service_result: T) -> Result<Transcript>;
}

pub struct WhisperUtils;

impl WhisperUtils {
    /// Format duration in seconds to a human-readable string
    pub fn format_duration(seconds: u64) -> String {
        let hours = seconds / (60 * 60);
        let minutes = (seconds % (60 * 60)) / 60;
        let secs = seconds % 60;

        if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, secs)
        } else {
            format!("{}s", secs)
        }
    }

    /// `model_path` if set, else `<models_dir>/ggml-<model_size>.bin`.
    pub fn resolve_model_path(config: &AsrConfig) -> PathBuf {
        match &config.model_path {
            Some(path) if !path.trim().is_empty() => PathBuf::from(crate::paths::strip_quotes(path)),
            _ => Path::new(&config.models_dir).join(format!("ggml-{}.bin", config.model_size)),
        }
    }

    pub fn ensure_model_exists(config: &AsrConfig) -> Result<PathBuf> {
        let path = Self::resolve_model_path(config);
        if path.exists() {
            Ok(path)
        } else {
            Err(Jp2SubsError::Transcription(format!(
                "whisper model not found at {} (set asr.model_path or asr.models_dir)",
                path.display()
            )))
        }
    }
}
