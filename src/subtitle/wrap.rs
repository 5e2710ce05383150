//! Line wrapping for cue text.
//!
//! Spaced scripts wrap greedily at word boundaries; CJK text, which has no
//! word spaces, wraps by character count and prefers sentence punctuation once
//! a line is reasonably full. A single word longer than the limit is never
//! split. Text that needs more lines than allowed is cut at a word boundary on
//! the last line and marked with `…`.

pub const ELLIPSIS: char = '…';

const CJK_BREAK_PUNCTUATION: &[char] = &['、', '。', '！', '？', '!', '?', '.', '…'];

/// Share of the line limit after which CJK text may break at punctuation.
const CJK_PUNCTUATION_FILL: f64 = 0.6;

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn is_cjk_char(ch: char) -> bool {
    ('\u{3000}'..='\u{9fff}').contains(&ch) || ('\u{ff66}'..='\u{ff9d}').contains(&ch)
}

/// Japanese/Chinese tags, or text that is at least 40% CJK characters.
pub fn is_cjk_text(text: &str, lang: Option<&str>) -> bool {
    if let Some(lang) = lang {
        let base = lang.split(['-', '_']).next().unwrap_or(lang).to_ascii_lowercase();
        if base == "ja" || base == "zh" {
            return true;
        }
    }
    let total = char_len(text);
    if total == 0 {
        return false;
    }
    let cjk = text.chars().filter(|c| is_cjk_char(*c)).count();
    cjk as f64 / total as f64 >= 0.4
}

/// Wrap `text` into at most `max_lines` lines of at most `max_chars` characters.
///
/// Empty (or whitespace-only) text yields no lines.
pub fn wrap_text(text: &str, max_chars: usize, max_lines: usize, lang: Option<&str>) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let max_lines = max_lines.max(1);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return Vec::new();
    }

    if is_cjk_text(&text, lang) {
        wrap_cjk(&text, max_chars, max_lines)
    } else {
        wrap_words(&text, max_chars, max_lines)
    }
}

fn wrap_words(text: &str, max_chars: usize, max_lines: usize) -> Vec<String> {
    let words: Vec<&str> = text.split(' ').collect();
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    // index of the first word on `current`
    let mut line_start = 0;

    for (i, word) in words.iter().enumerate() {
        if current.is_empty() {
            current.push_str(word);
            line_start = i;
            continue;
        }
        if char_len(&current) + 1 + char_len(word) <= max_chars {
            current.push(' ');
            current.push_str(word);
            continue;
        }
        if lines.len() + 1 == max_lines {
            lines.push(truncate_words(&words[line_start..], max_chars));
            return lines;
        }
        lines.push(std::mem::take(&mut current));
        current.push_str(word);
        line_start = i;
    }
    lines.push(current);
    lines
}

/// Fit as many leading `words` as possible plus `…` into `max_chars`.
fn truncate_words(words: &[&str], max_chars: usize) -> String {
    let Some(first) = words.first() else {
        return String::new();
    };
    if char_len(first) + 1 > max_chars {
        // atomic word already at or past the limit; still mark the dropped rest
        return format!("{}{}", first, ELLIPSIS);
    }
    let mut line = first.to_string();
    for word in &words[1..] {
        if char_len(&line) + 1 + char_len(word) + 1 > max_chars {
            break;
        }
        line.push(' ');
        line.push_str(word);
    }
    line.push(ELLIPSIS);
    line
}

fn wrap_cjk(text: &str, max_chars: usize, max_lines: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let threshold = (max_chars as f64 * CJK_PUNCTUATION_FILL).ceil() as usize;
    let mut lines: Vec<String> = Vec::new();
    let mut current: Vec<char> = Vec::new();

    for (i, &ch) in chars.iter().enumerate() {
        if current.is_empty() && ch == ' ' {
            continue;
        }
        current.push(ch);
        let full = current.len() >= max_chars;
        let punct_break = CJK_BREAK_PUNCTUATION.contains(&ch) && current.len() >= threshold;
        if !(full || punct_break) {
            continue;
        }
        let rest_is_empty = chars[i + 1..].iter().all(|c| c.is_whitespace());
        if rest_is_empty {
            break;
        }
        if lines.len() + 1 == max_lines {
            // more text follows on the last allowed line
            let keep = current.len().min(max_chars - 1);
            let mut line: String = current[..keep].iter().collect::<String>().trim_end().to_string();
            line.push(ELLIPSIS);
            lines.push(line);
            return lines;
        }
        lines.push(current.iter().collect::<String>().trim_end().to_string());
        current.clear();
    }
    if !current.is_empty() {
        lines.push(current.iter().collect::<String>().trim_end().to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bounds(lines: &[String], max_chars: usize, max_lines: usize) {
        assert!(lines.len() <= max_lines, "too many lines: {:?}", lines);
        for line in lines {
            let atomic = !line.contains(' ');
            assert!(char_len(line) <= max_chars || atomic, "line too long: {:?}", line);
        }
    }

    #[test]
    fn test_short_text_is_one_line() {
        assert_eq!(wrap_text("How are you?", 42, 2, Some("en")), vec!["How are you?"]);
        assert!(wrap_text("   ", 42, 2, Some("en")).is_empty());
    }

    #[test]
    fn test_wraps_at_word_boundary() {
        let text = "I told you already that we are leaving for the station tomorrow morning";
        let lines = wrap_text(text, 42, 2, Some("en"));
        assert_eq!(
            lines,
            vec!["I told you already that we are leaving for", "the station tomorrow morning"]
        );
        assert_bounds(&lines, 42, 2);
    }

    #[test]
    fn test_overflow_is_truncated_with_ellipsis() {
        let text = "one two three four five six seven eight nine ten eleven twelve thirteen fourteen \
                    fifteen sixteen seventeen eighteen nineteen twenty";
        let lines = wrap_text(text, 20, 2, Some("en"));
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(ELLIPSIS));
        assert_bounds(&lines, 20, 2);
    }

    #[test]
    fn test_long_word_is_not_split() {
        let word = "Supercalifragilisticexpialidocious-and-then-some";
        let lines = wrap_text(&format!("{} yes", word), 42, 2, Some("en"));
        assert_eq!(lines, vec![word.to_string(), "yes".to_string()]);
    }

    #[test]
    fn test_overlong_word_on_last_line_still_marks_truncation() {
        let word = "Supercalifragilisticexpialidocious";
        let lines = wrap_text(&format!("{} and more", word), 20, 1, Some("en"));
        assert_eq!(lines, vec![format!("{}{}", word, ELLIPSIS)]);

        let lines = wrap_text(&format!("ok {} and more", word), 20, 2, Some("en"));
        assert_eq!(lines, vec!["ok".to_string(), format!("{}{}", word, ELLIPSIS)]);
    }

    #[test]
    fn test_cjk_breaks_at_punctuation_after_threshold() {
        let text = "今日はとても良い天気ですね、散歩に行きましょう。";
        let lines = wrap_text(text, 16, 2, Some("ja"));
        assert_eq!(lines, vec!["今日はとても良い天気ですね、", "散歩に行きましょう。"]);
    }

    #[test]
    fn test_cjk_overflow_marks_truncation() {
        let text = "あ".repeat(100);
        let lines = wrap_text(&text, 42, 2, Some("ja"));
        assert_eq!(lines.len(), 2);
        assert_eq!(char_len(&lines[0]), 42);
        assert_eq!(char_len(&lines[1]), 42);
        assert!(lines[1].ends_with(ELLIPSIS));
    }

    #[test]
    fn test_cjk_exact_fit_has_no_ellipsis() {
        let text = "あ".repeat(84);
        let lines = wrap_text(&text, 42, 2, Some("ja"));
        assert_eq!(lines.len(), 2);
        assert!(!lines[1].ends_with(ELLIPSIS));
    }

    #[test]
    fn test_cjk_detection() {
        assert!(is_cjk_text("hello", Some("ja")));
        assert!(is_cjk_text("元気？", None));
        assert!(!is_cjk_text("genki?", Some("romaji")));
        assert!(!is_cjk_text("", None));
    }

    #[test]
    fn test_bounds_hold_for_mixed_inputs() {
        let inputs = [
            "a",
            "Um, good morning",
            "This is a considerably longer sentence that keeps going on and on well past any reasonable subtitle length",
            "あの、おはようございます。今日は何をしますか？映画を見に行きましょうか。それとも家でゆっくりしますか？",
        ];
        for text in inputs {
            for (chars, lines) in [(42, 2), (20, 1), (10, 3)] {
                assert_bounds(&wrap_text(text, chars, lines, None), chars, lines);
            }
        }
    }
}
