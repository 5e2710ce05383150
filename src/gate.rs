//! Stage cache gate: decides whether a stage still has work to do.

use std::fmt;

use crate::master::{MasterRecord, ROMANIZE_FINGERPRINT};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    Ingest,
    Transcribe,
    Romanize,
    Translate(String),
    Export,
    Mux,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ingest => write!(f, "ingest"),
            Stage::Transcribe => write!(f, "transcribe"),
            Stage::Romanize => write!(f, "romanize"),
            Stage::Translate(lang) => write!(f, "translate[{}]", lang),
            Stage::Export => write!(f, "export"),
            Stage::Mux => write!(f, "mux"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub run: bool,
    pub reason: &'static str,
}

impl GateDecision {
    fn run(reason: &'static str) -> Self {
        Self { run: true, reason }
    }

    fn skip(reason: &'static str) -> Self {
        Self { run: false, reason }
    }
}

/// Pure decision; the caller invokes or skips the stage and persists results.
pub fn decide(stage: &Stage, record: Option<&MasterRecord>, force: bool) -> GateDecision {
    if force {
        return GateDecision::run("forced");
    }

    let record = match (stage, record) {
        (Stage::Export, _) => return GateDecision::run("export owns no record fields"),
        (Stage::Mux, _) => return GateDecision::run("mux owns no record fields"),
        (Stage::Ingest, None) => return GateDecision::run("no master record yet"),
        (Stage::Ingest, Some(_)) => return GateDecision::skip("master record exists; audio not needed"),
        (_, None) => return GateDecision::run("no master record yet"),
        (_, Some(record)) => record,
    };

    if record.segments.is_empty() {
        return GateDecision::skip("record has no segments");
    }

    match stage {
        Stage::Transcribe => {
            if record.segments.iter().all(|s| !s.ja_raw.trim().is_empty()) {
                GateDecision::skip("ja_raw present on all segments")
            } else {
                GateDecision::run("ja_raw missing on some segments")
            }
        }
        Stage::Romanize => {
            if record.segments.iter().any(|s| s.romaji.is_none()) {
                return GateDecision::run("romaji missing on some segments");
            }
            match record.meta.fingerprints.get(ROMANIZE_FINGERPRINT) {
                Some(digest) if *digest != record.source_fingerprint() => {
                    GateDecision::run("ja_raw changed since romanization")
                }
                _ => GateDecision::skip("romaji present on all segments"),
            }
        }
        Stage::Translate(lang) => {
            if record.segments.iter().all(|s| s.translations.contains_key(lang)) {
                GateDecision::skip("translation present on all segments")
            } else {
                GateDecision::run("translation missing on some segments")
            }
        }
        Stage::Ingest | Stage::Export | Stage::Mux => unreachable!("handled above"),
    }
}

/// `shouldRun(stage, record, force)`
pub fn should_run(stage: &Stage, record: Option<&MasterRecord>, force: bool) -> bool {
    decide(stage, record, force).run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::{Meta, Segment};

    fn record() -> MasterRecord {
        let mut record = MasterRecord::new(Meta::new("a.flac"));
        record.segments.push(Segment::new(1, 0.0, 1.0, "こんにちは"));
        record.segments.push(Segment::new(2, 1.0, 2.0, "元気？"));
        record
    }

    #[test]
    fn test_missing_record_runs_everything_but_passes_export() {
        assert!(should_run(&Stage::Ingest, None, false));
        assert!(should_run(&Stage::Transcribe, None, false));
        assert!(should_run(&Stage::Romanize, None, false));
        assert!(should_run(&Stage::Export, None, false));
    }

    #[test]
    fn test_transcribe_skips_when_source_text_present() {
        let rec = record();
        assert!(!should_run(&Stage::Transcribe, Some(&rec), false));
        assert!(!should_run(&Stage::Ingest, Some(&rec), false));
        assert!(should_run(&Stage::Transcribe, Some(&rec), true));

        let mut rec = record();
        rec.segments[1].ja_raw.clear();
        assert!(should_run(&Stage::Transcribe, Some(&rec), false));
    }

    #[test]
    fn test_empty_record_is_satisfied() {
        let rec = MasterRecord::new(Meta::new("silence.flac"));
        assert!(!should_run(&Stage::Transcribe, Some(&rec), false));
        assert!(!should_run(&Stage::Romanize, Some(&rec), false));
        assert!(!should_run(&Stage::Translate("en".into()), Some(&rec), false));
        assert!(should_run(&Stage::Export, Some(&rec), false));
    }

    #[test]
    fn test_romanize_reruns_after_source_edit() {
        let mut rec = record();
        assert!(should_run(&Stage::Romanize, Some(&rec), false));

        rec.apply_romaji(vec!["konnichiwa".into(), "genki?".into()]).unwrap();
        assert!(!should_run(&Stage::Romanize, Some(&rec), false));

        rec.segments[0].ja_raw = "こんばんは".into();
        let decision = decide(&Stage::Romanize, Some(&rec), false);
        assert!(decision.run);
        assert_eq!(decision.reason, "ja_raw changed since romanization");
    }

    #[test]
    fn test_translate_requires_key_on_every_segment() {
        let mut rec = record();
        let stage = Stage::Translate("en".into());
        assert!(should_run(&stage, Some(&rec), false));

        rec.set_translation(1, "en", "Hello".into()).unwrap();
        assert!(should_run(&stage, Some(&rec), false));

        rec.set_translation(2, "en", String::new()).unwrap();
        assert!(!should_run(&stage, Some(&rec), false));
        assert!(should_run(&Stage::Translate("pt-BR".into()), Some(&rec), false));
    }
}
