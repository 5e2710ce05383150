use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Jp2SubsError, Result};

/// External tool invocation (ffmpeg, whisper.cpp, llama.cpp, romanizer filters)
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
    stdin: Option<String>,
}

impl ToolCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
            stdin: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Text written to the child's stdin
    pub fn stdin<S: Into<String>>(mut self, input: S) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn copy_audio(self) -> Self {
        self.audio_codec("copy")
    }

    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    pub fn map<S: Into<String>>(self, spec: S) -> Self {
        self.arg("-map").arg(spec)
    }

    /// Run to completion and discard stdout.
    pub async fn execute(&self) -> Result<()> {
        self.execute_capture().await.map(|_| ())
    }

    /// Run to completion and return stdout.
    ///
    /// The child is killed if the returned future is dropped, so a timeout or
    /// cancellation around this call never leaves a stray process.
    pub async fn execute_capture(&self) -> Result<String> {
        debug!("Executing {}: {} {:?}", self.description, self.binary_path, self.args);

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Jp2SubsError::ExternalTool(format!(
                "{} failed: could not start '{}' (is it on PATH?): {}",
                self.description, self.binary_path, e
            ))
        })?;

        if let (Some(input), Some(mut pipe)) = (&self.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Jp2SubsError::ExternalTool(format!(
                "{} failed ({}): {}",
                self.description,
                output.status,
                tail(&stderr, 20)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Builder for the ffmpeg operations the pipeline needs
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// FLAC 48 kHz, mono or stereo
    pub fn extract_audio<P: AsRef<Path>>(&self, input: P, audio_path: P, mono: bool) -> ToolCommand {
        ToolCommand::new(&self.binary_path, "ffmpeg audio extraction")
            .overwrite()
            .input(input)
            .no_video()
            .audio_codec("flac")
            .audio_sample_rate(48000)
            .audio_channels(if mono { 1 } else { 2 })
            .output(audio_path)
    }

    /// Copy every stream of the video and add one subtitle track per file.
    pub fn soft_mux<P: AsRef<Path>>(
        &self,
        video_path: P,
        subtitles: &[(P, String)],
        output_path: P,
    ) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.binary_path, "ffmpeg mux")
            .overwrite()
            .input(&video_path);
        for (path, _) in subtitles {
            cmd = cmd.input(path);
        }
        cmd = cmd.map("0");
        for idx in 0..subtitles.len() {
            cmd = cmd.map((idx + 1).to_string());
        }
        cmd = cmd.arg("-c").arg("copy");

        let is_mp4 = output_path
            .as_ref()
            .extension()
            .map(|e| e.eq_ignore_ascii_case("mp4"))
            .unwrap_or(false);
        if is_mp4 {
            cmd = cmd.arg("-c:s").arg("mov_text");
        }
        for (idx, (_, lang)) in subtitles.iter().enumerate() {
            cmd = cmd
                .arg(format!("-metadata:s:s:{}", idx))
                .arg(format!("language={}", lang));
        }
        cmd.output(output_path)
    }

    /// Re-encode the video with the subtitles rendered through libass.
    pub fn hard_burn<P: AsRef<Path>>(
        &self,
        video_path: P,
        subtitle_path: P,
        output_path: P,
        codec: &str,
        crf: u32,
        preset: &str,
        additional_options: &[String],
    ) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.binary_path, "ffmpeg burn")
            .overwrite()
            .input(&video_path)
            .video_filter(format!("ass={}", escape_filter_path(subtitle_path.as_ref())))
            .video_codec(codec)
            .arg("-crf")
            .arg(crf.to_string())
            .arg("-preset")
            .arg(preset)
            .copy_audio();

        for option in additional_options {
            cmd = cmd.arg(option);
        }

        cmd.output(output_path)
    }

    pub fn version_check(&self) -> ToolCommand {
        ToolCommand::new(&self.binary_path, "ffmpeg version check").arg("-version")
    }
}

/// Quote a path for use inside an ffmpeg filter argument.
fn escape_filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let escaped = raw.replace(':', "\\:").replace('\'', "\\'");
    format!("'{}'", escaped)
}
