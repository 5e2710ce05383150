//! Romanization of `ja_raw` into `romaji`.
//!
//! The built-in romanizer converts hiragana and katakana to modified Hepburn
//! and passes kanji through unchanged. Full kanji readings need an external
//! filter command (for example `kakasi -i utf8 -Ja -Ha -Ka -s`).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::error::{Jp2SubsError, Result};
use crate::master::MasterRecord;
use crate::media::ToolCommand;

#[async_trait]
pub trait Romanizer: Send + Sync {
    async fn romanize(&self, text: &str) -> Result<String>;

    /// Recorded in the record's tool versions.
    fn name(&self) -> String;
}

/// Built-in kana to Hepburn converter.
#[derive(Debug, Default, Clone)]
pub struct KanaRomanizer;

#[async_trait]
impl Romanizer for KanaRomanizer {
    async fn romanize(&self, text: &str) -> Result<String> {
        Ok(kana_to_romaji(text))
    }

    fn name(&self) -> String {
        "kana-hepburn".to_string()
    }
}

/// External filter: text on stdin, romaji on stdout.
#[derive(Debug, Clone)]
pub struct CommandRomanizer {
    argv: Vec<String>,
}

impl CommandRomanizer {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.first().map(|s| s.trim().is_empty()).unwrap_or(true) {
            return Err(Jp2SubsError::Config("pipeline.romanizer_command must name a program".into()));
        }
        Ok(Self { argv })
    }
}

#[async_trait]
impl Romanizer for CommandRomanizer {
    async fn romanize(&self, text: &str) -> Result<String> {
        let output = ToolCommand::new(&self.argv[0], "romanizer")
            .args(self.argv[1..].iter().cloned())
            .stdin(format!("{}\n", text))
            .execute_capture()
            .await?;
        Ok(output.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    fn name(&self) -> String {
        self.argv[0].clone()
    }
}

pub fn create_romanizer(config: &PipelineConfig) -> Result<Arc<dyn Romanizer>> {
    match &config.romanizer_command {
        Some(argv) if !argv.is_empty() => Ok(Arc::new(CommandRomanizer::new(argv.clone())?)),
        _ => Ok(Arc::new(KanaRomanizer)),
    }
}

/// Romanize every segment once and store the result on the record.
pub async fn romanize_record(
    romanizer: &dyn Romanizer,
    record: &mut MasterRecord,
    cancel: &CancelToken,
) -> Result<()> {
    info!("Romanizing {} segments with {}", record.segments.len(), romanizer.name());
    let mut romaji = Vec::with_capacity(record.segments.len());
    for seg in &record.segments {
        cancel.check()?;
        romaji.push(romanizer.romanize(&seg.ja_raw).await?);
    }
    record.apply_romaji(romaji)?;
    record
        .meta
        .tool_versions
        .insert("romanizer".to_string(), romanizer.name());
    debug!("Romanization complete");
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Syllable(String),
    /// small tsu: doubles the next consonant
    Sokuon,
    /// syllabic n
    Moraic,
    /// prolonged sound mark
    Long,
    Text(String),
}

fn to_hiragana(c: char) -> char {
    if ('\u{30A1}'..='\u{30F6}').contains(&c) {
        char::from_u32(c as u32 - 0x60).unwrap_or(c)
    } else {
        c
    }
}

fn mono(c: char) -> Option<&'static str> {
    let s = match c {
        'あ' => "a", 'い' => "i", 'う' => "u", 'え' => "e", 'お' => "o",
        'か' => "ka", 'き' => "ki", 'く' => "ku", 'け' => "ke", 'こ' => "ko",
        'さ' => "sa", 'し' => "shi", 'す' => "su", 'せ' => "se", 'そ' => "so",
        'た' => "ta", 'ち' => "chi", 'つ' => "tsu", 'て' => "te", 'と' => "to",
        'な' => "na", 'に' => "ni", 'ぬ' => "nu", 'ね' => "ne", 'の' => "no",
        'は' => "ha", 'ひ' => "hi", 'ふ' => "fu", 'へ' => "he", 'ほ' => "ho",
        'ま' => "ma", 'み' => "mi", 'む' => "mu", 'め' => "me", 'も' => "mo",
        'や' => "ya", 'ゆ' => "yu", 'よ' => "yo",
        'ら' => "ra", 'り' => "ri", 'る' => "ru", 'れ' => "re", 'ろ' => "ro",
        'わ' => "wa", 'ゐ' => "i", 'ゑ' => "e", 'を' => "o",
        'が' => "ga", 'ぎ' => "gi", 'ぐ' => "gu", 'げ' => "ge", 'ご' => "go",
        'ざ' => "za", 'じ' => "ji", 'ず' => "zu", 'ぜ' => "ze", 'ぞ' => "zo",
        'だ' => "da", 'ぢ' => "ji", 'づ' => "zu", 'で' => "de", 'ど' => "do",
        'ば' => "ba", 'び' => "bi", 'ぶ' => "bu", 'べ' => "be", 'ぼ' => "bo",
        'ぱ' => "pa", 'ぴ' => "pi", 'ぷ' => "pu", 'ぺ' => "pe", 'ぽ' => "po",
        'ゔ' => "vu", 'ゕ' => "ka", 'ゖ' => "ke",
        'ぁ' => "a", 'ぃ' => "i", 'ぅ' => "u", 'ぇ' => "e", 'ぉ' => "o",
        'ゃ' => "ya", 'ゅ' => "yu", 'ょ' => "yo", 'ゎ' => "wa",
        _ => return None,
    };
    Some(s)
}

fn small_y(c: char) -> Option<char> {
    match c {
        'ゃ' => Some('a'),
        'ゅ' => Some('u'),
        'ょ' => Some('o'),
        _ => None,
    }
}

fn small_vowel(c: char) -> Option<char> {
    match c {
        'ぁ' => Some('a'),
        'ぃ' => Some('i'),
        'ぅ' => Some('u'),
        'ぇ' => Some('e'),
        'ぉ' => Some('o'),
        _ => None,
    }
}

fn punctuation(c: char) -> Option<&'static str> {
    let s = match c {
        '、' | '，' => ", ",
        '。' | '．' => ". ",
        '？' => "? ",
        '！' => "! ",
        '「' | '」' | '『' | '』' => "\"",
        '（' => " (",
        '）' => ") ",
        '…' => "...",
        '〜' | '～' => "~",
        '・' | '\u{3000}' => " ",
        _ => return None,
    };
    Some(s)
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'i' | 'u' | 'e' | 'o')
}

/// きゃ -> kya, しゃ -> sha, じゃ -> ja
fn yoon(base: &str, vowel: char) -> String {
    if base == "ji" {
        format!("j{}", vowel)
    } else if base == "shi" || base == "chi" {
        format!("{}{}", &base[..2], vowel)
    } else {
        format!("{}y{}", &base[..base.len() - 1], vowel)
    }
}

/// ファ -> fa, ティ -> ti, ウィ -> wi, イェ -> ye
fn extended(base: &str, vowel: char) -> String {
    match base {
        "u" => format!("w{}", vowel),
        "i" => format!("y{}", vowel),
        "a" | "e" | "o" => format!("{}{}", base, vowel),
        _ => format!("{}{}", &base[..base.len() - 1], vowel),
    }
}

fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().map(to_hiragana).collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            'っ' => tokens.push(Token::Sokuon),
            'ん' => tokens.push(Token::Moraic),
            'ー' => tokens.push(Token::Long),
            _ => match mono(c) {
                Some(base) => {
                    let next = chars.get(i + 1).copied();
                    let syllable = match (next.and_then(small_y), next.and_then(small_vowel)) {
                        (Some(v), _) if base.len() > 1 && base.ends_with('i') => {
                            i += 1;
                            yoon(base, v)
                        }
                        (_, Some(v)) if small_vowel(c).is_none() => {
                            i += 1;
                            extended(base, v)
                        }
                        _ => base.to_string(),
                    };
                    tokens.push(Token::Syllable(syllable));
                }
                None => {
                    let text = punctuation(c).map(str::to_string).unwrap_or_else(|| c.to_string());
                    tokens.push(Token::Text(text));
                }
            },
        }
        i += 1;
    }
    tokens
}

/// Convert kana to modified Hepburn; other characters pass through.
pub fn kana_to_romaji(text: &str) -> String {
    let tokens = tokenize(text);
    let mut out = String::new();
    for (idx, token) in tokens.iter().enumerate() {
        let next = match tokens.get(idx + 1) {
            Some(Token::Syllable(s)) => Some(s.as_str()),
            _ => None,
        };
        match token {
            Token::Syllable(s) | Token::Text(s) => out.push_str(s),
            Token::Sokuon => match next {
                Some(s) if s.starts_with("ch") => out.push('t'),
                Some(s) => {
                    if let Some(first) = s.chars().next().filter(|c| !is_vowel(*c)) {
                        out.push(first);
                    }
                }
                None => {}
            },
            Token::Moraic => {
                out.push('n');
                if next.map(|s| s.starts_with(|c: char| is_vowel(c) || c == 'y')).unwrap_or(false) {
                    out.push('\'');
                }
            }
            Token::Long => {
                if let Some(last) = out.chars().last().filter(|c| is_vowel(*c)) {
                    out.push(last);
                }
            }
        }
    }
    out.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" ,", ",")
        .replace(" .", ".")
}
