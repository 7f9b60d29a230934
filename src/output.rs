use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Derive a versioned text path from a base artifact path:
/// `<stem><suffix>_YYYYMMDD_HHMM.txt` in the same directory.
/// Example: `downloads/Talk.mp3` + `_analysis` → `downloads/Talk_analysis_20260826_1430.txt`.
///
/// Collisions within the same minute resolve to the same path and overwrite.
pub fn versioned_path(base: &Path, suffix: &str) -> PathBuf {
    versioned_path_at(base, suffix, Local::now())
}

fn versioned_path_at(base: &Path, suffix: &str, now: DateTime<Local>) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let name = format!("{stem}{suffix}_{}.txt", now.format("%Y%m%d_%H%M"));
    match base.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Persist `text` next to `base` under a versioned name, returning the path written.
pub fn write_versioned(base: &Path, suffix: &str, text: &str) -> io::Result<PathBuf> {
    let path = versioned_path(base, suffix);
    fs::write(&path, text)?;
    Ok(path)
}
