use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{OutputMode, SubtitleFormat};

#[derive(Parser)]
#[command(author, version, about = "Japanese media to subtitles: transcribe, romanize, translate, export", long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FormatArg {
    Srt,
    Vtt,
    Ass,
}

impl From<FormatArg> for SubtitleFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Srt => SubtitleFormat::Srt,
            FormatArg::Vtt => SubtitleFormat::Vtt,
            FormatArg::Ass => SubtitleFormat::Ass,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputArg {
    Subtitles,
    Softcode,
    Hardcode,
    Sidecar,
}

impl From<OutputArg> for OutputMode {
    fn from(value: OutputArg) -> Self {
        match value {
            OutputArg::Subtitles => OutputMode::Subtitles,
            OutputArg::Softcode => OutputMode::SoftMux,
            OutputArg::Hardcode => OutputMode::HardBurn,
            OutputArg::Sidecar => OutputMode::Sidecar,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeArg {
    Llm,
    #[value(name = "draft+postedit")]
    DraftPostedit,
}

/// Options shared by `process` and `batch`
#[derive(clap::Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Target languages for translation (comma-separated); config default when omitted
    #[arg(short, long, value_delimiter = ',')]
    pub to: Option<Vec<String>>,

    /// What to produce after export
    #[arg(long, value_enum)]
    pub output: Option<OutputArg>,

    /// Directory for muxed, burned or sidecar files
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Subtitle format
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,

    /// Secondary language stacked in each cue (e.g. ja or romaji)
    #[arg(long)]
    pub bilingual: Option<String>,

    /// Also romanize the transcript
    #[arg(long)]
    pub romaji: bool,

    /// Translation mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Re-run stages even when the master record already has their output
    #[arg(long)]
    pub force: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract the audio track into the workdir
    Ingest {
        /// Input media file
        #[arg(short, long)]
        input: PathBuf,

        /// Job directory (default: <input dir>/_jobs/<stem>-<ext>)
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        #[arg(long)]
        force: bool,
    },

    /// Transcribe media into master.json
    Transcribe {
        /// Input media file
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        workdir: Option<PathBuf>,

        #[arg(long)]
        force: bool,
    },

    /// Add romaji to every segment of master.json
    Romanize {
        #[arg(short, long)]
        workdir: PathBuf,

        #[arg(long)]
        force: bool,
    },

    /// Translate master.json into one or more languages
    Translate {
        #[arg(short, long)]
        workdir: PathBuf,

        /// Target languages (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        to: Vec<String>,

        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        #[arg(long)]
        force: bool,
    },

    /// Render subtitles from master.json
    Export {
        #[arg(short, long)]
        workdir: PathBuf,

        /// Languages to export (comma-separated); source language when omitted
        #[arg(short, long, value_delimiter = ',')]
        lang: Vec<String>,

        #[arg(long, value_enum)]
        format: Option<FormatArg>,

        #[arg(long)]
        bilingual: Option<String>,

        /// Write a single-language export here instead of the workdir
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Add a subtitle track to a video without re-encoding
    Softcode {
        #[arg(long)]
        video: PathBuf,

        #[arg(long)]
        subs: PathBuf,

        /// Language tag for the track metadata
        #[arg(long, default_value = "und")]
        lang: String,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Burn subtitles into the picture
    Hardcode {
        #[arg(long)]
        video: PathBuf,

        #[arg(long)]
        subs: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Copy subtitles next to a video as <stem>.<lang>.<ext>
    Sidecar {
        #[arg(long)]
        video: PathBuf,

        #[arg(long)]
        subs: PathBuf,

        #[arg(long, default_value = "und")]
        lang: String,

        /// Destination directory (default: the video's directory)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Run every stage for one file
    Process {
        /// Input media file
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        workdir: Option<PathBuf>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Run every stage for each media file in a directory
    Batch {
        /// Directory searched recursively for media files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Base directory for per-file workdirs (default: <input dir>/_jobs)
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        /// Files processed at once
        #[arg(short, long)]
        jobs: Option<usize>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Check that ffmpeg, whisper.cpp and the configured providers are usable
    Doctor,

    /// Write a default configuration file
    InitConfig {
        /// Destination (default: the user config directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
