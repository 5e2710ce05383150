use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::common::{Transcript, TranscriptionMapper, WhisperUtils};
use super::Transcriber;
use crate::config::AsrConfig;
use crate::error::{Jp2SubsError, Result};
use crate::master::RawSegment;
use crate::media::ToolCommand;

/// whisper.cpp `-oj` output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOutput {
    #[serde(default)]
    pub result: Option<WhisperCppResult>,
    #[serde(default)]
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppResult {
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppSegment {
    /// Milliseconds
    pub offsets: WhisperCppOffsets,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOffsets {
    pub from: u64,
    pub to: u64,
}

pub struct WhisperCppMapper;

impl TranscriptionMapper<WhisperCppOutput> for WhisperCppMapper {
    fn to_transcript(output: WhisperCppOutput) -> Result<Transcript> {
        let segments = output
            .transcription
            .into_iter()
            .map(|seg| RawSegment {
                start: seg.offsets.from as f64 / 1000.0,
                end: seg.offsets.to as f64 / 1000.0,
                text: seg.text.trim().to_string(),
            })
            .collect();

        Ok(Transcript {
            segments,
            language: output
                .result
                .and_then(|r| r.language)
                .unwrap_or_else(|| "unknown".to_string()),
            model_info: String::new(),
        })
    }
}

/// Runs the whisper.cpp CLI and reads its JSON output file.
pub struct WhisperCppTranscriber {
    config: AsrConfig,
}

impl WhisperCppTranscriber {
    pub fn new(config: AsrConfig) -> Self {
        Self { config }
    }

    fn command(&self, model: &Path, audio_path: &Path, output_base: &Path) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.config.binary_path, "whisper.cpp transcription")
            .arg("-m")
            .arg(model.to_string_lossy().to_string())
            .arg("-f")
            .arg(audio_path.to_string_lossy().to_string())
            .arg("-l")
            .arg(&self.config.language)
            .arg("-bs")
            .arg(self.config.beam_size.to_string())
            .arg("-tp")
            .arg(self.config.temperature.to_string())
            .arg("-oj")
            .arg("-of")
            .arg(output_base.to_string_lossy().to_string());

        if let Some(threads) = self.config.threads {
            cmd = cmd.arg("-t").arg(threads.to_string());
        }
        if self.config.device.eq_ignore_ascii_case("cpu") {
            cmd = cmd.arg("-ng");
        }
        if self.config.vad {
            if let Some(vad_model) = &self.config.vad_model {
                cmd = cmd.arg("--vad").arg("-vm").arg(vad_model);
            }
        }
        cmd
    }
}

#[async_trait]
impl Transcriber for WhisperCppTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript> {
        if !audio_path.exists() {
            return Err(Jp2SubsError::FileNotFound(audio_path.display().to_string()));
        }
        let model = WhisperUtils::ensure_model_exists(&self.config)?;
        if self.config.vad && self.config.vad_model.is_none() {
            info!("VAD requested but asr.vad_model is not set; running without VAD");
        }

        let temp_dir = tempfile::tempdir()?;
        let output_base = temp_dir.path().join("transcript");
        info!(
            "Transcribing {} with {} (beam {}, temperature {})",
            audio_path.display(),
            model.display(),
            self.config.beam_size,
            self.config.temperature
        );
        self.command(&model, audio_path, &output_base).execute().await?;

        let json_file = output_base.with_extension("json");
        let json_content = std::fs::read_to_string(&json_file).map_err(|e| {
            Jp2SubsError::Transcription(format!("Failed to read {}: {}", json_file.display(), e))
        })?;
        let output: WhisperCppOutput = serde_json::from_str(&json_content)
            .map_err(|e| Jp2SubsError::Transcription(format!("Failed to parse whisper.cpp JSON: {}", e)))?;

        let mut transcript = WhisperCppMapper::to_transcript(output)?;
        transcript.model_info = format!(
            "whisper.cpp {}",
            model.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
        );
        info!(
            "Transcribed {} segments ({})",
            transcript.segments.len(),
            WhisperUtils::format_duration(transcript.duration() as u64)
        );
        Ok(transcript)
    }

    fn name(&self) -> String {
        "whisper.cpp".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "systeminfo": "AVX = 1",
        "model": {"type": "large"},
        "result": {"language": "ja"},
        "transcription": [
            {"timestamps": {"from": "00:00:00,000", "to": "00:00:02,500"},
             "offsets": {"from": 0, "to": 2500}, "text": " あの、おはよう"},
            {"timestamps": {"from": "00:00:02,500", "to": "00:00:04,000"},
             "offsets": {"from": 2500, "to": 4000}, "text": "元気？"}
        ]
    }"#;

    #[test]
    fn test_maps_offsets_to_seconds() {
        let output: WhisperCppOutput = serde_json::from_str(SAMPLE).unwrap();
        let transcript = WhisperCppMapper::to_transcript(output).unwrap();
        assert_eq!(transcript.language, "ja");
        assert_eq!(
            transcript.segments,
            vec![
                RawSegment { start: 0.0, end: 2.5, text: "あの、おはよう".into() },
                RawSegment { start: 2.5, end: 4.0, text: "元気？".into() },
            ]
        );
    }

    #[test]
    fn test_command_flags() {
        let config = AsrConfig {
            device: "cpu".into(),
            vad: true,
            vad_model: Some("silero.bin".into()),
            threads: Some(4),
            ..AsrConfig::default()
        };
        let transcriber = WhisperCppTranscriber::new(config);
        let cmd = transcriber.command(Path::new("m.bin"), Path::new("audio.flac"), Path::new("/tmp/out"));
        let joined = cmd.args.join(" ");
        assert!(joined.starts_with("-m m.bin -f audio.flac -l ja -bs 5 -tp 0 -oj -of /tmp/out"));
        assert!(joined.contains("-t 4"));
        assert!(joined.contains("-ng"));
        assert!(joined.ends_with("--vad -vm silero.bin"));
    }

    #[tokio::test]
    async fn test_missing_audio_is_reported() {
        let transcriber = WhisperCppTranscriber::new(AsrConfig::default());
        let err = transcriber.transcribe(Path::new("/nonexistent/audio.flac")).await.unwrap_err();
        assert!(matches!(err, Jp2SubsError::FileNotFound(_)));
    }
}
