use std::collections::BTreeMap;
use std::sync::Arc;

use super::glossary::Glossary;
use crate::error::{Jp2SubsError, Result};

/// Which pass a provider call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Single,
    Draft,
    PostEdit,
}

/// Everything a provider needs besides the input lines.
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub source_lang: String,
    pub target_lang: String,
    pub glossary: Arc<Glossary>,
    pub pass: Pass,
    /// Draft line per input line; only set for `Pass::PostEdit`
    pub drafts: Option<Vec<String>>,
    /// Set on the retry after a line-count mismatch
    pub reminder: bool,
}

impl BlockContext {
    pub fn new<S: Into<String>, T: Into<String>>(source_lang: S, target_lang: T, glossary: Arc<Glossary>) -> Self {
        Self {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            glossary,
            pass: Pass::Single,
            drafts: None,
            reminder: false,
        }
    }

    pub fn with_pass(mut self, pass: Pass) -> Self {
        self.pass = pass;
        self
    }

    pub fn with_drafts(mut self, drafts: Vec<String>) -> Self {
        self.drafts = Some(drafts);
        self
    }
}

const FIDELITY_DIRECTIVE: &str = "\
You are a professional Japanese-to-{target} subtitle translator.
- Keep absolute fidelity to what was spoken; do not omit interjections, fillers or hesitations.
- Keep repetitions unless they are obvious noise.
- Preserve names and honorifics as-is unless a glossary entry says otherwise.
- Never paraphrase away content and never add or invent meaning.
- Never merge or split lines: every input line gets exactly one output line.";

const POSTEDIT_DIRECTIVE: &str = "\
You are refining a machine-translated {target} draft of Japanese subtitles.
Each input line holds the Japanese source and the draft, separated by a tab.
- Keep fidelity to the Japanese source; do not delete fillers or tics like えっと or あの.
- Keep names and honorifics unchanged unless a glossary entry enforces a replacement.
- Output natural {target}, concise but accurate.
- Never merge or split lines: every input line gets exactly one output line.";

const OUTPUT_FORMAT: &str = "\
Return one translation per input line, each prefixed with its 0-based line number \
and a tab character (example: `0\t<translation>`).";

const LINE_COUNT_REMINDER: &str = "\
IMPORTANT: your previous answer had the wrong number of lines. \
Return exactly {count} lines, one output line per input line, numbered 0 to {last}.";

/// System-style instructions for a block.
pub fn build_instructions(ctx: &BlockContext, line_count: usize) -> String {
    let target = language_code_to_name(&ctx.target_lang);
    let directive = match ctx.pass {
        Pass::PostEdit => POSTEDIT_DIRECTIVE,
        Pass::Single | Pass::Draft => FIDELITY_DIRECTIVE,
    };
    let mut prompt = directive.replace("{target}", &target);

    if !ctx.glossary.is_empty() {
        prompt.push_str("\nGlossary (always use these renderings):\n");
        for (term, rendering) in ctx.glossary.entries() {
            prompt.push_str(&format!("{} -> {}\n", term, rendering));
        }
    }
    if ctx.reminder {
        prompt.push('\n');
        prompt.push_str(
            &LINE_COUNT_REMINDER
                .replace("{count}", &line_count.to_string())
                .replace("{last}", &line_count.saturating_sub(1).to_string()),
        );
    }
    prompt
}

/// Numbered input lines; post-edit lines carry `source<TAB>draft`.
pub fn render_numbered_input(lines: &[String], ctx: &BlockContext) -> String {
    let mut input = String::new();
    for (idx, line) in lines.iter().enumerate() {
        let line = flatten(line);
        match (ctx.pass, ctx.drafts.as_ref().and_then(|d| d.get(idx))) {
            (Pass::PostEdit, Some(draft)) => {
                input.push_str(&format!("{}\t{}\t{}\n", idx, line, flatten(draft)));
            }
            _ => input.push_str(&format!("{}\t{}\n", idx, line)),
        }
    }
    input
}

/// Full plain-text prompt for completion-style backends.
pub fn build_text_prompt(lines: &[String], ctx: &BlockContext, chat_template: bool) -> String {
    let instructions = build_instructions(ctx, lines.len());
    let input = render_numbered_input(lines, ctx);
    if chat_template {
        format!(
            "<system>\n{}\n{}\n</system>\n<user>\nINPUT:\n{}OUTPUT:\n</user>",
            instructions.trim(),
            OUTPUT_FORMAT,
            input
        )
    } else {
        format!("{}\n{}\nINPUT:\n{}OUTPUT:", instructions.trim(), OUTPUT_FORMAT, input)
    }
}

fn flatten(line: &str) -> String {
    line.replace(['\n', '\r', '\t'], " ")
}

/// Parse `<index>\t<text>` lines into an ordered list.
///
/// Anything before the last `OUTPUT:` marker is ignored (some binaries echo the
/// prompt). Indices must be exactly `0..n`; gaps or duplicates are malformed.
/// The returned length is the number of indexed lines found, so the caller can
/// compare it with the input count.
pub fn parse_indexed_output(raw: &str) -> Result<Vec<String>> {
    let body = match raw.rfind("OUTPUT:") {
        Some(pos) => &raw[pos + "OUTPUT:".len()..],
        None => raw,
    };

    let mut indexed: BTreeMap<usize, String> = BTreeMap::new();
    for raw_line in body.lines() {
        let line = raw_line.trim_start();
        let Some((idx, text)) = line.split_once('\t') else {
            continue;
        };
        let Ok(idx) = idx.trim().parse::<usize>() else {
            continue;
        };
        if indexed.insert(idx, text.trim().to_string()).is_some() {
            return Err(Jp2SubsError::Provider(format!("line {} returned twice", idx)));
        }
    }

    for (expected, idx) in indexed.keys().enumerate() {
        if *idx != expected {
            return Err(Jp2SubsError::Provider(format!(
                "line numbering has a gap before index {}",
                idx
            )));
        }
    }
    Ok(indexed.into_values().collect())
}

/// Convert language code to full language name for clearer prompts
pub fn language_code_to_name(code: &str) -> String {
    let base = code.split(['-', '_']).next().unwrap_or(code).to_lowercase();
    let name = match base.as_str() {
        "en" => "English",
        "ja" => "Japanese",
        "pt" if code.eq_ignore_ascii_case("pt-BR") => "Brazilian Portuguese",
        "pt" => "Portuguese",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "ko" => "Korean",
        "zh" => "Chinese",
        "ru" => "Russian",
        "pl" => "Polish",
        "nl" => "Dutch",
        "tr" => "Turkish",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "id" => "Indonesian",
        "sv" => "Swedish",
        "uk" => "Ukrainian",
        _ => return code.to_string(), // Fallback to the code itself if not found
    };
    name.to_string()
}
