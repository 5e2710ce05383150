//! Master record store.
//!
//! One `master.json` per workdir holds the metadata and every segment the
//! pipeline has produced so far. Stages read it, add their fields and write it
//! back; nothing else is durable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Jp2SubsError, Result};

pub const MASTER_FILE_NAME: &str = "master.json";
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "uuid::Uuid::new_v4")]
    pub record_id: uuid::Uuid,
    #[serde(default)]
    pub source: String,
    #[serde(default = "now_rfc3339")]
    pub created_at: String,
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
    /// Settings snapshot used to produce the record
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Digest of the input each stage consumed, keyed by stage name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fingerprints: BTreeMap<String, String>,
}

impl Meta {
    pub fn new<S: Into<String>>(source: S) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            record_id: uuid::Uuid::new_v4(),
            source: source.into(),
            created_at: now_rfc3339(),
            tool_versions: BTreeMap::new(),
            settings: BTreeMap::new(),
            fingerprints: BTreeMap::new(),
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub ja_raw: String,
    #[serde(default)]
    pub romaji: Option<String>,
    /// Absent key means "not translated yet"; an empty string is a real translation
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
}

impl Segment {
    pub fn new<S: Into<String>>(id: u32, start: f64, end: f64, ja_raw: S) -> Self {
        Self {
            id,
            start,
            end,
            ja_raw: ja_raw.into(),
            romaji: None,
            translations: BTreeMap::new(),
        }
    }

    pub fn translation(&self, lang: &str) -> Option<&str> {
        self.translations.get(lang).map(String::as_str)
    }
}

/// One timed line straight out of the recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterRecord {
    pub meta: Meta,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl MasterRecord {
    pub fn new(meta: Meta) -> Self {
        Self {
            meta,
            segments: Vec::new(),
        }
    }

    /// Wrap recognizer output into a fresh record with sequential 1-based ids.
    pub fn from_transcript<S: Into<String>>(
        source: S,
        raw: Vec<RawSegment>,
        settings: BTreeMap<String, String>,
    ) -> Self {
        let mut meta = Meta::new(source);
        meta.settings = settings;

        let mut segments = Vec::with_capacity(raw.len());
        for seg in raw {
            let text = seg.text.trim();
            if text.is_empty() {
                debug!("Dropping empty recognizer segment at {:.3}s", seg.start);
                continue;
            }
            if !seg.start.is_finite() || !seg.end.is_finite() || seg.start < 0.0 || seg.end <= seg.start {
                warn!(
                    "Dropping recognizer segment with unusable timing {:.3}..{:.3}: {}",
                    seg.start, seg.end, text
                );
                continue;
            }
            let id = segments.len() as u32 + 1;
            segments.push(Segment::new(id, seg.start, seg.end, text));
        }

        Self { meta, segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment_mut(&mut self, id: u32) -> Option<&mut Segment> {
        // ids are strictly increasing, so a binary search is valid on a validated record
        match self.segments.binary_search_by_key(&id, |s| s.id) {
            Ok(idx) => self.segments.get_mut(idx),
            Err(_) => self.segments.iter_mut().find(|s| s.id == id),
        }
    }

    /// Check schema version, ids and timings.
    pub fn validate(&self) -> Result<()> {
        if self.meta.schema_version > SCHEMA_VERSION {
            return Err(Jp2SubsError::validation(
                None,
                format!(
                    "record schema version {} is newer than supported version {}",
                    self.meta.schema_version, SCHEMA_VERSION
                ),
            ));
        }

        let mut previous: Option<&Segment> = None;
        for seg in &self.segments {
            if seg.id == 0 {
                return Err(Jp2SubsError::validation(Some(seg.id), "segment ids are 1-based"));
            }
            if !seg.start.is_finite() || !seg.end.is_finite() {
                return Err(Jp2SubsError::validation(Some(seg.id), "start/end must be finite"));
            }
            if seg.start < 0.0 {
                return Err(Jp2SubsError::validation(Some(seg.id), "start must be non-negative"));
            }
            if seg.end <= seg.start {
                return Err(Jp2SubsError::validation(
                    Some(seg.id),
                    format!("end {:.3} must be greater than start {:.3}", seg.end, seg.start),
                ));
            }
            if let Some(prev) = previous {
                if seg.id <= prev.id {
                    return Err(Jp2SubsError::validation(
                        Some(seg.id),
                        format!("segment id must be greater than previous id {}", prev.id),
                    ));
                }
                if seg.start < prev.end {
                    debug!(
                        "Segment {} starts {:.3}s before segment {} ends",
                        seg.id,
                        prev.end - seg.start,
                        prev.id
                    );
                }
            }
            previous = Some(seg);
        }
        Ok(())
    }

    /// Store romanized text for every segment; lengths must match.
    pub fn apply_romaji(&mut self, romaji: Vec<String>) -> Result<()> {
        if romaji.len() != self.segments.len() {
            return Err(Jp2SubsError::validation(
                None,
                format!(
                    "romaji list has {} entries for {} segments",
                    romaji.len(),
                    self.segments.len()
                ),
            ));
        }
        for (seg, text) in self.segments.iter_mut().zip(romaji) {
            seg.romaji = Some(text);
        }
        let digest = self.source_fingerprint();
        self.meta
            .fingerprints
            .insert(ROMANIZE_FINGERPRINT.to_string(), digest);
        Ok(())
    }

    pub fn set_translation(&mut self, id: u32, lang: &str, text: String) -> Result<()> {
        let seg = self
            .segment_mut(id)
            .ok_or_else(|| Jp2SubsError::validation(Some(id), "no such segment"))?;
        seg.translations.insert(lang.to_string(), text);
        Ok(())
    }

    /// SHA-256 over every segment's `ja_raw`, used to detect source edits.
    pub fn source_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for seg in &self.segments {
            hasher.update(seg.id.to_le_bytes());
            hasher.update(seg.ja_raw.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Jp2SubsError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let record: MasterRecord = serde_json::from_str(&content).map_err(|e| {
            Jp2SubsError::validation(None, format!("{} is not a valid master record: {}", path.display(), e))
        })?;
        record.validate()?;
        debug!("Loaded master record {} ({} segments)", path.display(), record.segments.len());
        Ok(record)
    }

    pub fn load_if_exists<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Validate, then write atomically next to the target so readers never see half a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.validate()?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let content = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Jp2SubsError::Io(e.error))?;

        info!("Saved master record: {}", path.display());
        Ok(())
    }
}

pub const ROMANIZE_FINGERPRINT: &str = "romanize";

/// `<workdir>/master.json`
pub fn master_path<P: AsRef<Path>>(workdir: P) -> PathBuf {
    workdir.as_ref().join(MASTER_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> MasterRecord {
        let mut record = MasterRecord::new(Meta::new("sample.wav"));
        record.segments.push(Segment::new(1, 0.0, 2.5, "あの、おはよう"));
        record.segments.push(Segment::new(2, 2.5, 4.0, "元気？"));
        record
    }

    #[test]
    fn test_save_and_load_preserves_document() {
        let dir = tempdir().unwrap();
        let path = master_path(dir.path());

        let mut record = sample();
        record.set_translation(2, "en", "How are you?".into()).unwrap();
        record.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("あの、おはよう"), "non-ASCII text must be stored verbatim");

        let loaded = MasterRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.segments[1].translation("en"), Some("How are you?"));
        assert_eq!(loaded.segments[0].translation("en"), None);
    }

    #[test]
    fn test_load_minimal_document_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.json");
        std::fs::write(
            &path,
            r#"{
  "meta": {"source": "sample.wav", "tool_versions": {}, "settings": {}},
  "segments": [
    {"id": 1, "start": 0.0, "end": 1.0, "ja_raw": "テスト", "translations": {"ja": "テスト"}}
  ]
}"#,
        )
        .unwrap();

        let record = MasterRecord::load(&path).unwrap();
        assert_eq!(record.meta.schema_version, SCHEMA_VERSION);
        assert_eq!(record.segments[0].ja_raw, "テスト");
        assert_eq!(record.segments[0].romaji, None);
    }

    #[test]
    fn test_validation_reports_offending_segment() {
        let mut record = sample();
        record.segments[1].end = 1.0;
        match record.validate() {
            Err(Jp2SubsError::Validation { segment_id, .. }) => assert_eq!(segment_id, Some(2)),
            other => panic!("expected validation error, got {:?}", other),
        }

        let mut record = sample();
        record.segments[1].id = 1;
        assert!(record.validate().is_err());

        let mut record = sample();
        record.segments[0].start = f64::NAN;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_overlapping_segments_are_tolerated() {
        let mut record = sample();
        record.segments[1].start = 2.4;
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut record = sample();
        record.meta.schema_version = SCHEMA_VERSION + 1;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_empty_record_is_valid() {
        let record = MasterRecord::new(Meta::new("silence.wav"));
        assert!(record.validate().is_ok());
        assert!(record.is_empty());
    }

    #[test]
    fn test_from_transcript_assigns_sequential_ids() {
        let raw = vec![
            RawSegment { start: 0.0, end: 1.0, text: " こんにちは ".into() },
            RawSegment { start: 1.0, end: 1.0, text: "zero".into() },
            RawSegment { start: 1.2, end: 2.0, text: "   ".into() },
            RawSegment { start: 2.0, end: 3.0, text: "さようなら".into() },
        ];
        let record = MasterRecord::from_transcript("a.flac", raw, BTreeMap::new());
        let ids: Vec<u32> = record.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(record.segments[0].ja_raw, "こんにちは");
        assert_eq!(record.segments[1].ja_raw, "さようなら");
    }

    #[test]
    fn test_apply_romaji_requires_matching_length() {
        let mut record = sample();
        assert!(record.apply_romaji(vec!["ano".into()]).is_err());
        record
            .apply_romaji(vec!["ano, ohayou".into(), "genki?".into()])
            .unwrap();
        assert_eq!(record.segments[0].romaji.as_deref(), Some("ano, ohayou"));
        assert_eq!(
            record.meta.fingerprints.get(ROMANIZE_FINGERPRINT),
            Some(&record.source_fingerprint())
        );
    }

    #[test]
    fn test_fingerprint_tracks_source_text() {
        let record = sample();
        let mut edited = record.clone();
        edited.segments[0].ja_raw = "えっと、おはよう".into();
        assert_ne!(record.source_fingerprint(), edited.source_fingerprint());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = master_path(dir.path());
        assert!(matches!(MasterRecord::load(&path), Err(Jp2SubsError::FileNotFound(_))));
        assert!(MasterRecord::load_if_exists(&path).unwrap().is_none());
    }
}
