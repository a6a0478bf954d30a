// ============================================================
// Layer 3 — Failure Accounting
// ============================================================
// A batch run never aborts on a single bad file. Instead every
// file that could not be read, predicted or written becomes a
// FailureRecord, and the run reports how many files succeeded
// next to the full list of failures.
//
// On disk a failure is a two-element JSON array:
//   ["tiles/a.tif", "Cannot open 'tiles/a.tif': No such file"]

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A (file path, error message) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct FailureRecord {
    pub path:  String,
    pub error: String,
}

impl FailureRecord {
    pub fn new(path: impl Into<String>, error: impl fmt::Display) -> Self {
        Self { path: path.into(), error: error.to_string() }
    }
}

impl From<(String, String)> for FailureRecord {
    fn from((path, error): (String, String)) -> Self {
        Self { path, error }
    }
}

impl From<FailureRecord> for (String, String) {
    fn from(record: FailureRecord) -> Self {
        (record.path, record.error)
    }
}

/// Outcome of a whole inference run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Prediction rasters written
    pub processed: usize,

    /// Every file that produced no output, in the order it failed
    pub failures: Vec<FailureRecord>,

    /// Location of failed_files.json, if any failure occurred
    pub failure_manifest: Option<PathBuf>,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Files accounted for, successful or not
    pub fn total(&self) -> usize {
        self.processed + self.failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialises_as_pair() {
        let record = FailureRecord::new("tiles/a.tif", "decode error");
        let json   = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"["tiles/a.tif","decode error"]"#);

        let back: FailureRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
