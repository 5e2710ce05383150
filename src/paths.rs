//! Input path clean-up and workdir derivation.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Drop surrounding whitespace and quotes left by drag-and-drop or copy-paste.
pub fn strip_quotes(raw: &str) -> &str {
    raw.trim().trim_matches('"').trim_matches('\'')
}

pub fn normalize_input_path(raw: &str) -> PathBuf {
    let cleaned = strip_quotes(raw);
    if let Some(rest) = cleaned.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(cleaned)
}

/// `<parent>/_jobs/<stem>-<ext>` for a single input file, so `ep01.mkv` and
/// `ep01.mp4` in one directory keep separate records.
pub fn default_workdir_for_input(input: &Path) -> PathBuf {
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "job".to_string());
    let name = match input.extension() {
        Some(ext) => format!("{}-{}", stem, ext.to_string_lossy().to_lowercase()),
        None => stem,
    };
    parent.join("_jobs").join(name)
}

/// A path that looks like a file (has an extension) is turned into a directory next to it.
pub fn coerce_workdir(path: &Path) -> PathBuf {
    match (path.extension(), path.file_stem()) {
        (Some(_), Some(stem)) => path.with_file_name(stem),
        _ => path.to_path_buf(),
    }
}

/// Batch workdir: `<base>/<stem>-<first 12 hex chars of SHA-256(absolute path)>`.
///
/// Keyed on the whole path so same-named files from different folders, or
/// with different extensions, never share a record.
pub fn workdir_for_media(base: &Path, media: &Path) -> PathBuf {
    let stem = media
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "job".to_string());
    let full = std::fs::canonicalize(media)
        .or_else(|_| std::path::absolute(media))
        .unwrap_or_else(|_| media.to_path_buf());
    let digest = format!("{:x}", Sha256::digest(full.to_string_lossy().as_bytes()));
    base.join(format!("{}-{}", stem, &digest[..12]))
}

/// Render `path` relative to `base` when possible, for summaries.
pub fn display_relative(path: &Path, base: &Path) -> String {
    pathdiff::diff_paths(path, base)
        .filter(|p| !p.as_os_str().is_empty() && !p.starts_with(".."))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}
