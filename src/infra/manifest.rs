// ============================================================
// Layer 6 — Manifests
// ============================================================
// Two plain files frame an inference run:
//
//   input manifest     — text, one raster path per line
//   failed_files.json  — [[path, error], ...] written into the
//                        output directory when anything failed
//
// A missing input manifest is a setup error: the run cannot
// start without knowing what to process.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::domain::failure::FailureRecord;

pub const FAILURE_MANIFEST_NAME: &str = "failed_files.json";

/// Read the list of input paths. Lines are trimmed and blank
/// lines skipped; order is preserved.
pub fn read_input_manifest(path: &Path) -> Result<Vec<PathBuf>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read input list '{}'", path.display()))?;

    let paths: Vec<PathBuf> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect();

    tracing::debug!("Input list '{}' names {} files", path.display(), paths.len());
    Ok(paths)
}

/// Persist failures next to the predictions.
/// Returns the manifest path, or None when there was nothing to record.
pub fn write_failure_manifest(output_dir: &Path, failures: &[FailureRecord]) -> Result<Option<PathBuf>> {
    if failures.is_empty() {
        return Ok(None);
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Cannot create output directory '{}'", output_dir.display()))?;

    let path = output_dir.join(FAILURE_MANIFEST_NAME);
    let json = serde_json::to_string_pretty(failures)?;
    fs::write(&path, json)
        .with_context(|| format!("Cannot write '{}'", path.display()))?;

    Ok(Some(path))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_blank_lines_are_ignored() {
        let tmp  = TempDir::new().unwrap();
        let list = tmp.path().join("files.txt");
        fs::write(&list, "a.tif\n\n   \n  b.tif  \nc.tif").unwrap();

        let paths = read_input_manifest(&list).unwrap();
        assert_eq!(paths, vec![PathBuf::from("a.tif"), PathBuf::from("b.tif"), PathBuf::from("c.tif")]);
    }

    #[test]
    fn test_missing_manifest_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(read_input_manifest(&tmp.path().join("nope.txt")).is_err());
    }

    #[test]
    fn test_failure_manifest_only_written_on_failure() {
        let tmp = TempDir::new().unwrap();
        assert!(write_failure_manifest(tmp.path(), &[]).unwrap().is_none());
        assert!(!tmp.path().join(FAILURE_MANIFEST_NAME).exists());

        let failures = vec![FailureRecord::new("missing.tif", "Cannot open 'missing.tif'")];
        let path     = write_failure_manifest(tmp.path(), &failures).unwrap().unwrap();

        let parsed: Vec<(String, String)> =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed, vec![("missing.tif".to_string(), "Cannot open 'missing.tif'".to_string())]);
    }
}
