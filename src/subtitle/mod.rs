// Subtitle export: timestamp syntax, line wrapping and SRT/VTT/ASS rendering.

pub mod render;
pub mod timestamp;
pub mod wrap;

pub use render::{
    render, select_text, subtitle_file_name, write_subtitles, write_transcript, ExportOptions, TranscriptKind,
    ROMAJI_TAG,
};
pub use timestamp::{format_timestamp, parse_timestamp};
pub use wrap::{is_cjk_text, wrap_text};
