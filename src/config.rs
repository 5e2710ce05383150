use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Jp2SubsError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub asr: AsrConfig,
    pub translate: TranslateConfig,
    pub export: ExportConfig,
    pub media: MediaConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// Path to the whisper.cpp CLI binary
    pub binary_path: String,
    /// Model size name (e.g. large-v3); resolved under `models_dir` unless `model_path` is set
    pub model_size: String,
    pub model_path: Option<String>,
    pub models_dir: String,
    /// auto | cuda | cpu
    pub device: String,
    pub vad: bool,
    /// VAD model file, required by whisper.cpp for `--vad`
    pub vad_model: Option<String>,
    pub temperature: f32,
    pub beam_size: u32,
    pub language: String,
    pub threads: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslationMode {
    /// One provider pass per block
    #[serde(rename = "llm", alias = "single")]
    Single,
    /// Draft pass, then a post-edit pass over (source, draft) pairs
    #[serde(rename = "draft+postedit")]
    DraftPostEdit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Echo,
    Local,
    Api,
    Ollama,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceField {
    #[serde(rename = "ja_raw")]
    Raw,
    #[serde(rename = "romaji")]
    Romaji,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    pub mode: TranslationMode,
    /// Provider for single-pass mode and for the draft pass
    pub provider: ProviderKind,
    /// Post-edit provider; falls back to `provider`
    pub postedit_provider: Option<ProviderKind>,
    pub target_languages: Vec<String>,
    pub source_lang: String,
    pub source_field: SourceField,
    pub block_size: usize,
    /// Blocks of one language in flight at once
    pub max_concurrent_blocks: usize,
    /// Attempts per provider call on transport errors or timeouts
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub call_timeout_secs: u64,
    pub glossary_path: Option<PathBuf>,
    pub local: LocalProviderConfig,
    pub api: ApiProviderConfig,
    pub ollama: OllamaProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalProviderConfig {
    pub binary_path: String,
    pub model_path: String,
    pub extra_args: Vec<String>,
    /// Wrap the prompt in <system>/<user> chat markers
    pub chat_template: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiProviderConfig {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaProviderConfig {
    pub endpoint: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    Srt,
    Vtt,
    Ass,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
            SubtitleFormat::Ass => "ass",
        }
    }
}

impl std::str::FromStr for SubtitleFormat {
    type Err = Jp2SubsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "srt" => Ok(SubtitleFormat::Srt),
            "vtt" | "webvtt" => Ok(SubtitleFormat::Vtt),
            "ass" | "ssa" => Ok(SubtitleFormat::Ass),
            other => Err(Jp2SubsError::UnsupportedFormat(format!(
                "subtitle format '{}' (expected srt, vtt or ass)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub format: SubtitleFormat,
    /// Secondary language stacked under the primary line
    pub bilingual: Option<String>,
    pub max_chars_per_line: usize,
    pub max_lines: usize,
    pub skip_empty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    Subtitles,
    SoftMux,
    HardBurn,
    Sidecar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    pub mono: bool,
    /// mkv | mp4 for soft muxing
    pub container: String,
    pub codec: String,
    pub crf: u32,
    pub preset: String,
    /// Extra ffmpeg options appended to burn commands
    pub burn_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub generate_romaji: bool,
    pub output: OutputMode,
    /// Files processed concurrently in batch mode
    pub batch_jobs: usize,
    pub extensions: Vec<String>,
    /// Romanizer command filter (stdin -> stdout); built-in kana romanizer when unset
    pub romanizer_command: Option<Vec<String>>,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            binary_path: "whisper-cli".to_string(),
            model_size: "large-v3".to_string(),
            model_path: None,
            models_dir: "models".to_string(),
            device: "auto".to_string(),
            vad: true,
            vad_model: None,
            temperature: 0.0,
            beam_size: 5,
            language: "ja".to_string(),
            threads: None,
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            mode: TranslationMode::Single,
            provider: ProviderKind::Echo,
            postedit_provider: None,
            target_languages: vec!["en".to_string()],
            source_lang: "ja".to_string(),
            source_field: SourceField::Raw,
            block_size: 20,
            max_concurrent_blocks: 4,
            max_attempts: 3,
            backoff_base_ms: 1000,
            call_timeout_secs: 120,
            glossary_path: None,
            local: LocalProviderConfig::default(),
            api: ApiProviderConfig::default(),
            ollama: OllamaProviderConfig::default(),
        }
    }
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            binary_path: "llama-cli".to_string(),
            model_path: "model.gguf".to_string(),
            extra_args: Vec::new(),
            chat_template: false,
        }
    }
}

impl Default for OllamaProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: SubtitleFormat::Srt,
            bilingual: None,
            max_chars_per_line: 42,
            max_lines: 2,
            skip_empty: false,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            mono: false,
            container: "mkv".to_string(),
            codec: "libx264".to_string(),
            crf: 18,
            preset: "slow".to_string(),
            burn_options: vec![
                // Example encoding options users can customize:
                // "-pix_fmt".to_string(), "yuv420p".to_string(),
            ],
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generate_romaji: false,
            output: OutputMode::Subtitles,
            batch_jobs: 2,
            extensions: ["mp4", "mkv", "webm", "mov", "avi", "flac", "mp3", "wav", "m4a"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            romanizer_command: None,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Jp2SubsError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Jp2SubsError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| Jp2SubsError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)
            .map_err(|e| Jp2SubsError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// `~/.config/jp2subs/config.toml` (or the platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("jp2subs").join("config.toml"))
    }

    /// Explicit path, then `./config.toml`, then the user config file, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let local = Path::new("config.toml");
                if local.exists() {
                    info!("Found config.toml in current directory, loading...");
                    Self::from_file(local)?
                } else {
                    match Self::default_path().filter(|p| p.exists()) {
                        Some(path) => {
                            info!("Loading configuration from {}", path.display());
                            Self::from_file(path)?
                        }
                        None => Self::default(),
                    }
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `JP2SUBS_*` overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = non_empty("JP2SUBS_LLAMA_BINARY") {
            debug!("JP2SUBS_LLAMA_BINARY override: {}", v);
            self.translate.local.binary_path = crate::paths::strip_quotes(&v).to_string();
        }
        if let Some(v) = non_empty("JP2SUBS_LLAMA_MODEL") {
            self.translate.local.model_path = crate::paths::strip_quotes(&v).to_string();
        }
        if let Some(v) = non_empty("JP2SUBS_LLAMA_ARGS") {
            self.translate.local.extra_args = shlex::split(&v).ok_or_else(|| {
                Jp2SubsError::Config(format!("JP2SUBS_LLAMA_ARGS has unbalanced quotes: {}", v))
            })?;
        }
        if let Some(v) = non_empty("JP2SUBS_LLAMA_CHAT") {
            self.translate.local.chat_template = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = non_empty("JP2SUBS_API_URL") {
            self.translate.api.url = v;
        }
        if let Some(v) = non_empty("JP2SUBS_API_KEY") {
            self.translate.api.api_key = Some(v);
        }
        if let Some(v) = non_empty("JP2SUBS_FFMPEG") {
            self.media.binary_path = crate::paths::strip_quotes(&v).to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.translate.block_size == 0 {
            return Err(Jp2SubsError::Config("translate.block_size must be at least 1".into()));
        }
        if self.translate.max_concurrent_blocks == 0 {
            return Err(Jp2SubsError::Config("translate.max_concurrent_blocks must be at least 1".into()));
        }
        if self.translate.max_attempts == 0 {
            return Err(Jp2SubsError::Config("translate.max_attempts must be at least 1".into()));
        }
        if self.export.max_chars_per_line == 0 || self.export.max_lines == 0 {
            return Err(Jp2SubsError::Config("export line limits must be at least 1".into()));
        }
        if self.pipeline.batch_jobs == 0 {
            return Err(Jp2SubsError::Config("pipeline.batch_jobs must be at least 1".into()));
        }
        Ok(())
    }

    /// Flattened settings stored in the master record's provenance.
    pub fn settings_snapshot(&self) -> std::collections::BTreeMap<String, String> {
        let mut settings = std::collections::BTreeMap::new();
        settings.insert("model_size".into(), self.asr.model_size.clone());
        settings.insert("device".into(), self.asr.device.clone());
        settings.insert("vad_filter".into(), self.asr.vad.to_string());
        settings.insert("temperature".into(), self.asr.temperature.to_string());
        settings.insert("beam_size".into(), self.asr.beam_size.to_string());
        settings.insert("language".into(), self.asr.language.clone());
        settings
    }
}
