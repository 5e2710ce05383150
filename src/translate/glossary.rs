//! Glossary overrides: source term -> required target rendering.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{Jp2SubsError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Glossary {
    /// Longest source term first so overlapping terms resolve to the most specific one
    entries: Vec<(String, String)>,
}

impl Glossary {
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        let mut entries: Vec<(String, String)> = map
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();
        entries.sort_by(|a, b| {
            b.0.chars()
                .count()
                .cmp(&a.0.chars().count())
                .then_with(|| a.0.cmp(&b.0))
        });
        Self { entries }
    }

    /// JSON object mapping source term to target rendering.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Jp2SubsError::Config(format!("Failed to read glossary {}: {}", path.display(), e)))?;
        let map: BTreeMap<String, String> = serde_json::from_str(&content)
            .map_err(|e| Jp2SubsError::Config(format!("Glossary {} must be a JSON object of strings: {}", path.display(), e)))?;
        let glossary = Self::from_map(map);
        debug!("Loaded {} glossary entries from {}", glossary.len(), path.display());
        Ok(glossary)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries.iter().cloned().collect()
    }

    /// Force the glossary rendering of every term found in `source` into `output`.
    ///
    /// Per term: keep the output if it already carries the rendering; otherwise
    /// replace a verbatim copy of the source term, then an ASCII case variant of
    /// the rendering; as a last resort append the rendering in parentheses,
    /// e.g. `"Wait, senior!"` becomes `"Wait, senior! (senpai)"`. The provider's
    /// own wording for the term cannot be located, so it stays as written.
    /// Text unrelated to the term is never touched.
    pub fn enforce(&self, source: &str, output: &str) -> String {
        let mut result = output.to_string();
        for (term, rendering) in &self.entries {
            if !source.contains(term.as_str()) || result.contains(rendering.as_str()) {
                continue;
            }
            if result.contains(term.as_str()) {
                result = result.replace(term.as_str(), rendering);
                continue;
            }
            if let Some(pos) = result
                .to_ascii_lowercase()
                .find(&rendering.to_ascii_lowercase())
            {
                result.replace_range(pos..pos + rendering.len(), rendering);
                continue;
            }
            result = if result.trim().is_empty() {
                rendering.clone()
            } else {
                format!("{} ({})", result.trim_end(), rendering)
            };
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glossary(pairs: &[(&str, &str)]) -> Glossary {
        Glossary::from_map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_untranslated_term_is_replaced() {
        let g = glossary(&[("先輩", "senpai")]);
        assert_eq!(g.enforce("先輩、待って", "先輩, wait"), "senpai, wait");
    }

    #[test]
    fn test_case_variant_is_normalized() {
        let g = glossary(&[("東京", "Tokyo")]);
        assert_eq!(g.enforce("東京に行く", "going to tokyo"), "going to Tokyo");
    }

    #[test]
    fn test_missing_rendering_is_appended() {
        let g = glossary(&[("先輩", "senpai")]);
        assert_eq!(g.enforce("先輩、待って", "Wait, senior!"), "Wait, senior! (senpai)");
        assert_eq!(g.enforce("先輩", ""), "senpai");
    }

    #[test]
    fn test_terms_absent_from_source_are_ignored() {
        let g = glossary(&[("先輩", "senpai")]);
        assert_eq!(g.enforce("元気？", "How are you?"), "How are you?");
    }

    #[test]
    fn test_longest_term_wins() {
        let g = glossary(&[("田中", "Tanaka"), ("田中先生", "Tanaka-sensei")]);
        let entries: Vec<_> = g.entries().map(|(k, _)| k.to_string()).collect();
        assert_eq!(entries, vec!["田中先生", "田中"]);
        assert_eq!(g.enforce("田中先生！", "田中先生!"), "Tanaka-sensei!");
    }

    #[test]
    fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glossary.json");
        std::fs::write(&path, r#"{"先輩": "senpai", "  ": "x"}"#).unwrap();
        let g = Glossary::load(&path).unwrap();
        assert_eq!(g.len(), 1);

        std::fs::write(&path, r#"["not", "a", "map"]"#).unwrap();
        assert!(Glossary::load(&path).is_err());
    }
}
