//! jp2subs - Japanese media to subtitles
//!
//! Transcribes Japanese audio with whisper.cpp into a per-file master record,
//! optionally romanizes and translates it block by block, and renders SRT, VTT
//! or ASS subtitles that can be muxed, burned or placed next to the video.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod master;
pub mod media;
pub mod paths;
pub mod romanize;
pub mod subtitle;
pub mod transcribe;
pub mod translate;
pub mod workflow;
