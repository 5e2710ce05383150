use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{media_kind, MediaCommandBuilder, MediaKind, MediaProcessorTrait};
use crate::config::MediaConfig;
use crate::error::{Jp2SubsError, Result};

pub const AUDIO_FILE_STEM: &str = "audio";

/// ffmpeg-backed media processor
pub struct MediaProcessorImpl {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path);

        Self {
            config,
            command_builder,
        }
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// `<out_dir>/<video stem>.<lang>.<subtitle ext>`
pub fn sidecar_path(video: &Path, subtitle: &Path, lang: &str, out_dir: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    let ext = subtitle
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "srt".to_string());
    out_dir.join(format!("{}.{}.{}", stem, lang, ext))
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    async fn extract_audio(&self, input: &Path, workdir: &Path, mono: bool) -> Result<PathBuf> {
        if !input.exists() {
            return Err(Jp2SubsError::FileNotFound(input.display().to_string()));
        }
        std::fs::create_dir_all(workdir)?;

        match media_kind(input) {
            Some(MediaKind::Audio) => {
                let ext = input
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_else(|| "flac".to_string());
                let target = workdir.join(format!("{}.{}", AUDIO_FILE_STEM, ext));
                info!("Input is already audio, copying {} -> {}", input.display(), target.display());
                std::fs::copy(input, &target)?;
                Ok(target)
            }
            Some(MediaKind::Video) => {
                let target = workdir.join(format!("{}.flac", AUDIO_FILE_STEM));
                info!("Extracting audio from {} to {}", input.display(), target.display());
                self.command_builder
                    .extract_audio(input, target.as_path(), mono)
                    .execute()
                    .await?;
                info!("Audio extraction completed");
                Ok(target)
            }
            None => Err(Jp2SubsError::UnsupportedFormat(format!(
                "{} (expected one of: {}, {})",
                input.display(),
                super::VIDEO_EXTENSIONS.join(", "),
                super::AUDIO_EXTENSIONS.join(", ")
            ))),
        }
    }

    async fn soft_mux(&self, video: &Path, subtitles: &[(PathBuf, String)], output: &Path) -> Result<PathBuf> {
        if subtitles.is_empty() {
            return Err(Jp2SubsError::Config("no subtitle tracks to mux".to_string()));
        }
        ensure_parent(output)?;
        info!(
            "Muxing {} subtitle track(s) into {} -> {}",
            subtitles.len(),
            video.display(),
            output.display()
        );
        let tracks: Vec<(&Path, String)> = subtitles
            .iter()
            .map(|(path, lang)| (path.as_path(), lang.clone()))
            .collect();
        self.command_builder.soft_mux(video, &tracks, output).execute().await?;
        Ok(output.to_path_buf())
    }

    async fn hard_burn(&self, video: &Path, subtitle: &Path, output: &Path) -> Result<PathBuf> {
        ensure_parent(output)?;
        info!("Burning {} into {} -> {}", subtitle.display(), video.display(), output.display());
        self.command_builder
            .hard_burn(
                video,
                subtitle,
                output,
                &self.config.codec,
                self.config.crf,
                &self.config.preset,
                &self.config.burn_options,
            )
            .execute()
            .await?;
        info!("Burn completed");
        Ok(output.to_path_buf())
    }

    async fn sidecar(&self, video: &Path, subtitle: &Path, lang: &str, out_dir: &Path) -> Result<PathBuf> {
        if !subtitle.exists() {
            return Err(Jp2SubsError::FileNotFound(subtitle.display().to_string()));
        }
        std::fs::create_dir_all(out_dir)?;
        let target = sidecar_path(video, subtitle, lang, out_dir);
        debug!("Sidecar {} -> {}", subtitle.display(), target.display());
        std::fs::copy(subtitle, &target)?;
        Ok(target)
    }

    async fn check_availability(&self) -> Result<String> {
        let stdout = self.command_builder.version_check().execute_capture().await?;
        let first_line = stdout.lines().next().unwrap_or("unknown version").to_string();
        info!("ffmpeg available: {}", first_line);
        Ok(first_line)
    }
}
