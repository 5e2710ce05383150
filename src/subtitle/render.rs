use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::timestamp::format_timestamp;
use super::wrap::wrap_text;
use crate::config::{ExportConfig, SubtitleFormat};
use crate::error::Result;
use crate::master::{MasterRecord, Segment};

/// Reserved language tag selecting `Segment::romaji`.
pub const ROMAJI_TAG: &str = "romaji";

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: SubtitleFormat,
    /// Primary language tag
    pub lang: String,
    /// Secondary language stacked under the primary line
    pub secondary: Option<String>,
    /// Tag that selects `ja_raw`
    pub source_lang: String,
    pub max_chars_per_line: usize,
    pub max_lines: usize,
    pub skip_empty: bool,
}

impl ExportOptions {
    pub fn new<S: Into<String>>(format: SubtitleFormat, lang: S) -> Self {
        let defaults = ExportConfig::default();
        Self {
            format,
            lang: lang.into(),
            secondary: None,
            source_lang: "ja".to_string(),
            max_chars_per_line: defaults.max_chars_per_line,
            max_lines: defaults.max_lines,
            skip_empty: defaults.skip_empty,
        }
    }

    pub fn from_config(config: &ExportConfig, lang: &str, source_lang: &str) -> Self {
        Self {
            format: config.format,
            lang: lang.to_string(),
            secondary: config.bilingual.clone().filter(|s| s != lang),
            source_lang: source_lang.to_string(),
            max_chars_per_line: config.max_chars_per_line,
            max_lines: config.max_lines,
            skip_empty: config.skip_empty,
        }
    }

    pub fn with_secondary<S: Into<String>>(mut self, secondary: S) -> Self {
        self.secondary = Some(secondary.into());
        self
    }
}

/// Text of `segment` for a language tag; empty when that layer is missing.
pub fn select_text<'a>(segment: &'a Segment, tag: &str, source_lang: &str) -> &'a str {
    if tag.eq_ignore_ascii_case(source_lang) {
        &segment.ja_raw
    } else if tag == ROMAJI_TAG {
        segment.romaji.as_deref().unwrap_or("")
    } else {
        segment.translation(tag).unwrap_or("")
    }
}

/// One timed event with already wrapped lines.
#[derive(Debug, Clone, PartialEq)]
struct Cue {
    id: u32,
    start: String,
    end: String,
    primary: Vec<String>,
    secondary: Vec<String>,
}

impl Cue {
    fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }

    /// Primary lines, then secondary lines.
    fn stacked(&self) -> Vec<&str> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .map(String::as_str)
            .collect()
    }
}

fn build_cues(record: &MasterRecord, opts: &ExportOptions) -> Result<Vec<Cue>> {
    let mut segments: Vec<&Segment> = record.segments.iter().collect();
    segments.sort_by(|a, b| a.id.cmp(&b.id).then(a.start.total_cmp(&b.start)));

    // stacked formats split the line budget between the two languages; ASS
    // gives each language its own event with the full budget
    let lines_per_lang = match (&opts.secondary, opts.format) {
        (Some(_), SubtitleFormat::Srt | SubtitleFormat::Vtt) => (opts.max_lines / 2).max(1),
        _ => opts.max_lines,
    };

    let mut cues = Vec::with_capacity(segments.len());
    for seg in segments {
        let start = format_timestamp(seg.start, opts.format, Some(seg.id))?;
        let end = format_timestamp(seg.end, opts.format, Some(seg.id))?;
        let wrap = |tag: &str| {
            wrap_text(
                select_text(seg, tag, &opts.source_lang),
                opts.max_chars_per_line,
                lines_per_lang,
                Some(tag),
            )
        };
        let cue = Cue {
            id: seg.id,
            start,
            end,
            primary: wrap(&opts.lang),
            secondary: opts.secondary.as_deref().map(wrap).unwrap_or_default(),
        };
        if opts.skip_empty && cue.is_empty() {
            debug!("Skipping empty cue for segment {}", seg.id);
            continue;
        }
        cues.push(cue);
    }
    Ok(cues)
}

fn render_srt(cues: &[Cue]) -> String {
    cues.iter()
        .enumerate()
        .map(|(i, cue)| format!("{}\n{} --> {}\n{}\n", i + 1, cue.start, cue.end, cue.stacked().join("\n")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_vtt(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn render_vtt(cues: &[Cue]) -> String {
    let mut out = String::from("WEBVTT\n");
    for (i, cue) in cues.iter().enumerate() {
        let text: Vec<String> = cue.stacked().into_iter().map(escape_vtt).collect();
        out.push_str(&format!("\n{}\n{} --> {}\n{}\n", i + 1, cue.start, cue.end, text.join("\n")));
    }
    out
}

const ASS_HEADER: &str = "\
[Script Info]
ScriptType: v4.00+
WrapStyle: 2
ScaledBorderAndShadow: yes
YCbCr Matrix: TV.601

[V4+ Styles]
Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding
Style: Default,Arial,42,&H00FFFFFF,&H000000FF,&H3C000000,&H64000000,0,0,0,0,100,100,0,0,1,2,0,2,20,20,20,1
Style: Secondary,Arial,32,&H00C8C8C8,&H000000FF,&H3C000000,&H64000000,0,0,0,0,100,100,0,0,1,2,0,8,20,20,20,1

[Events]
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
";

/// Braces open override blocks and backslashes start tags, so literal ones
/// become their full-width forms.
fn escape_ass(text: &str) -> String {
    text.replace('\\', "\u{FF3C}")
        .replace('{', "\u{FF5B}")
        .replace('}', "\u{FF5D}")
}

fn ass_dialogue(cue: &Cue, style: &str, lines: &[String]) -> String {
    let text: Vec<String> = lines.iter().map(|l| escape_ass(l)).collect();
    format!(
        "Dialogue: 0,{},{},{},,0,0,0,,{}\n",
        cue.start,
        cue.end,
        style,
        text.join("\\N")
    )
}

/// Primary text on `Default`; the secondary language gets its own `Secondary` event.
fn render_ass(cues: &[Cue], bilingual: bool, skip_empty: bool) -> String {
    let mut out = String::from(ASS_HEADER);
    for cue in cues {
        if !(skip_empty && cue.primary.is_empty()) {
            out.push_str(&ass_dialogue(cue, "Default", &cue.primary));
        }
        if bilingual && !(skip_empty && cue.secondary.is_empty()) {
            out.push_str(&ass_dialogue(cue, "Secondary", &cue.secondary));
        }
    }
    out
}

/// Render `record` into subtitle text. Identical inputs give identical bytes.
pub fn render(record: &MasterRecord, opts: &ExportOptions) -> Result<String> {
    let cues = build_cues(record, opts)?;
    let text = match opts.format {
        SubtitleFormat::Srt => render_srt(&cues),
        SubtitleFormat::Vtt => render_vtt(&cues),
        SubtitleFormat::Ass => render_ass(&cues, opts.secondary.is_some(), opts.skip_empty),
    };
    Ok(text)
}

/// `subs_<lang>.<ext>`
pub fn subtitle_file_name(lang: &str, format: SubtitleFormat) -> String {
    format!("subs_{}.{}", lang, format.extension())
}

pub fn write_subtitles<P: AsRef<Path>>(record: &MasterRecord, path: P, opts: &ExportOptions) -> Result<PathBuf> {
    let path = path.as_ref();
    let content = render(record, opts)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    info!("Wrote {} subtitles ({}): {}", opts.format.extension(), opts.lang, path.display());
    Ok(path.to_path_buf())
}

/// Which transcript layer to dump after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    Japanese,
    Romaji,
}

impl TranscriptKind {
    fn suffix(&self) -> &'static str {
        match self {
            TranscriptKind::Japanese => "ja",
            TranscriptKind::Romaji => "romaji",
        }
    }
}

/// Write `transcript_<kind>.txt` (one line per segment) and `transcript_<kind>.srt`.
pub fn write_transcript(record: &MasterRecord, workdir: &Path, kind: TranscriptKind) -> Result<Vec<PathBuf>> {
    let (tag, source_lang) = match kind {
        TranscriptKind::Japanese => ("ja", "ja"),
        TranscriptKind::Romaji => (ROMAJI_TAG, "ja"),
    };

    let txt_path = workdir.join(format!("transcript_{}.txt", kind.suffix()));
    let mut txt: String = record
        .segments
        .iter()
        .map(|s| select_text(s, tag, source_lang))
        .collect::<Vec<_>>()
        .join("\n");
    if !txt.is_empty() {
        txt.push('\n');
    }
    std::fs::create_dir_all(workdir)?;
    std::fs::write(&txt_path, txt)?;

    let srt_path = workdir.join(format!("transcript_{}.srt", kind.suffix()));
    let mut opts = ExportOptions::new(SubtitleFormat::Srt, tag);
    opts.source_lang = source_lang.to_string();
    let srt_path = write_subtitles(record, srt_path, &opts)?;

    Ok(vec![txt_path, srt_path])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::Meta;

    fn sample() -> MasterRecord {
        let mut record = MasterRecord::new(Meta::new("ep01.mkv"));
        let mut a = Segment::new(1, 0.0, 2.5, "あの、おはよう");
        a.translations.insert("en".into(), "Um, good morning".into());
        a.romaji = Some("ano, ohayou".into());
        let mut b = Segment::new(2, 2.5, 4.0, "元気？");
        b.translations.insert("en".into(), "How are you?".into());
        b.romaji = Some("genki?".into());
        record.segments = vec![a, b];
        record
    }

    #[test]
    fn test_srt_two_cues_in_order() {
        let out = render(&sample(), &ExportOptions::new(SubtitleFormat::Srt, "en")).unwrap();
        assert_eq!(
            out,
            "1\n00:00:00,000 --> 00:00:02,500\nUm, good morning\n\n\
             2\n00:00:02,500 --> 00:00:04,000\nHow are you?\n"
        );
    }

    #[test]
    fn test_source_tag_selects_ja_raw() {
        let out = render(&sample(), &ExportOptions::new(SubtitleFormat::Srt, "ja")).unwrap();
        assert!(out.contains("あの、おはよう"));
        assert!(out.contains("元気？"));
    }

    #[test]
    fn test_vtt_header_separator_and_escaping() {
        let mut record = sample();
        record.segments[0].translations.insert("en".into(), "<i>Tom & Jerry</i>".into());
        let out = render(&record, &ExportOptions::new(SubtitleFormat::Vtt, "en")).unwrap();
        assert!(out.starts_with("WEBVTT\n\n1\n00:00:00.000 --> 00:00:02.500\n"));
        assert!(out.contains("&lt;i&gt;Tom &amp; Jerry&lt;/i&gt;"));
    }

    #[test]
    fn test_ass_bilingual_uses_two_styles() {
        let opts = ExportOptions::new(SubtitleFormat::Ass, "en").with_secondary("ja");
        let out = render(&sample(), &opts).unwrap();
        assert!(out.contains("Style: Secondary,"));
        assert!(out.contains("Dialogue: 0,0:00:00.00,0:00:02.50,Default,,0,0,0,,Um, good morning\n"));
        assert!(out.contains("Dialogue: 0,0:00:00.00,0:00:02.50,Secondary,,0,0,0,,あの、おはよう\n"));
        assert_eq!(out.matches("Dialogue:").count(), 4);
    }

    #[test]
    fn test_ass_line_breaks_use_backslash_n() {
        let mut record = sample();
        record.segments[0].translations.insert(
            "en".into(),
            "I told you already that we are leaving for the station tomorrow".into(),
        );
        let out = render(&record, &ExportOptions::new(SubtitleFormat::Ass, "en")).unwrap();
        assert!(out.contains("leaving for\\Nthe station tomorrow"));
    }

    #[test]
    fn test_ass_bilingual_keeps_full_line_budget_per_language() {
        let mut record = sample();
        record.segments[0].translations.insert(
            "en".into(),
            "I told you already that we are leaving for the station tomorrow".into(),
        );
        let opts = ExportOptions::new(SubtitleFormat::Ass, "en").with_secondary("ja");
        let out = render(&record, &opts).unwrap();
        assert!(out.contains(",Default,,0,0,0,,I told you already that we are leaving for\\Nthe station tomorrow\n"));
    }

    #[test]
    fn test_ass_escapes_override_characters() {
        let mut record = sample();
        record.segments[0]
            .translations
            .insert("en".into(), "{\\b1}not bold{\\b0} \\N".into());
        let out = render(&record, &ExportOptions::new(SubtitleFormat::Ass, "en")).unwrap();
        assert!(out.contains(",Default,,0,0,0,,\u{FF5B}\u{FF3C}b1\u{FF5D}not bold\u{FF5B}\u{FF3C}b0\u{FF5D} \u{FF3C}N\n"));
        let events: String = out.lines().filter(|l| l.starts_with("Dialogue:")).collect();
        assert!(!events.contains('{') && !events.contains('}'));
    }

    #[test]
    fn test_srt_bilingual_stacks_primary_above_secondary() {
        let opts = ExportOptions::new(SubtitleFormat::Srt, "en").with_secondary(ROMAJI_TAG);
        let out = render(&sample(), &opts).unwrap();
        assert!(out.contains("Um, good morning\nano, ohayou\n"));
    }

    #[test]
    fn test_bilingual_long_secondary_wraps_independently() {
        let mut record = sample();
        record.segments[0].romaji = Some("ano ne ano ne kyou wa totemo ii tenki desu ne sanpo ni ikimashou".into());
        let opts = ExportOptions::new(SubtitleFormat::Srt, "en").with_secondary(ROMAJI_TAG);
        let out = render(&record, &opts).unwrap();
        let cue: Vec<&str> = out.split("\n\n").next().unwrap().lines().collect();
        // index, timing, one primary line, one secondary line
        assert_eq!(cue.len(), 4);
        assert_eq!(cue[2], "Um, good morning");
        assert!(cue[3].ends_with(super::super::wrap::ELLIPSIS));
        assert!(cue[3].chars().count() <= 42);
    }

    #[test]
    fn test_missing_translation_keeps_empty_cue_unless_skipped() {
        let mut record = sample();
        record.segments[1].translations.clear();
        let out = render(&record, &ExportOptions::new(SubtitleFormat::Srt, "en")).unwrap();
        assert!(out.ends_with("2\n00:00:02,500 --> 00:00:04,000\n\n"));

        let mut opts = ExportOptions::new(SubtitleFormat::Srt, "en");
        opts.skip_empty = true;
        let out = render(&record, &opts).unwrap();
        assert!(!out.contains("00:00:04,000"));
    }

    #[test]
    fn test_empty_record_renders_empty_document() {
        let record = MasterRecord::new(Meta::new("x"));
        assert_eq!(render(&record, &ExportOptions::new(SubtitleFormat::Srt, "en")).unwrap(), "");
        assert_eq!(render(&record, &ExportOptions::new(SubtitleFormat::Vtt, "en")).unwrap(), "WEBVTT\n");
        assert_eq!(render(&record, &ExportOptions::new(SubtitleFormat::Ass, "en")).unwrap(), ASS_HEADER);
    }

    #[test]
    fn test_invalid_timing_reports_segment() {
        let mut record = sample();
        record.segments[1].end = f64::NAN;
        let err = render(&record, &ExportOptions::new(SubtitleFormat::Srt, "en")).unwrap_err();
        assert!(matches!(err, crate::error::Jp2SubsError::Validation { segment_id: Some(2), .. }));
    }

    #[test]
    fn test_render_is_deterministic_and_ordered_by_id() {
        let mut record = sample();
        record.segments.reverse();
        let opts = ExportOptions::new(SubtitleFormat::Srt, "en");
        let first = render(&record, &opts).unwrap();
        assert_eq!(first, render(&record, &opts).unwrap());
        assert!(first.starts_with("1\n00:00:00,000"));
    }

    #[test]
    fn test_write_transcript_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_transcript(&sample(), dir.path(), TranscriptKind::Romaji).unwrap();
        assert_eq!(paths.len(), 2);
        let txt = std::fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(txt, "ano, ohayou\ngenki?\n");
        let srt = std::fs::read_to_string(dir.path().join("transcript_romaji.srt")).unwrap();
        assert!(srt.contains("genki?"));
    }
}
