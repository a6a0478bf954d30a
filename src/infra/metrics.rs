// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Columns:
//   epoch, train_loss, val_loss, lr,
//   accuracy, precision, recall, f1,    (classification losses)
//   mse, mae                            (regression losses)
//
// Metrics that do not apply to the run's loss, or a val_loss
// from an empty validation split, are left as empty cells.
//
// Output file: <run_dir>/metrics.csv
//
// Example CSV output (ce loss):
//   epoch,train_loss,val_loss,lr,accuracy,precision,recall,f1,mse,mae
//   1,0.693100,0.681200,0.001000,0.561000,0.540000,0.552000,0.545000,,
//
// Reference: Rust Book §12 (I/O and File Handling)

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::ml::metrics::MetricValues;

pub const HEADER: &str = "epoch,train_loss,val_loss,lr,accuracy,precision,recall,f1,mse,mae";

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    pub train_loss: f64,

    /// None when the validation split is empty
    pub val_loss: Option<f64>,

    /// Learning rate the epoch was trained with
    pub lr: f64,

    pub metrics: MetricValues,
}

impl EpochMetrics {
    /// True if this epoch improved over the previous best val_loss
    pub fn is_improvement(&self, best_val_loss: Option<f64>) -> bool {
        match (self.val_loss, best_val_loss) {
            (Some(v), Some(best)) => v < best,
            (Some(v), None)       => v.is_finite(),
            (None, _)             => false,
        }
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let csv_path = dir.join("metrics.csv");

        // Appending across runs keeps earlier epochs
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        let v = &m.metrics;
        writeln!(
            f,
            "{},{:.6},{},{:.6},{},{},{},{},{},{}",
            m.epoch,
            m.train_loss,
            cell(m.val_loss),
            m.lr,
            cell(v.accuracy),
            cell(v.precision),
            cell(v.recall),
            cell(v.f1),
            cell(v.mse),
            cell(v.mae),
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={}",
            m.epoch,
            m.train_loss,
            cell(m.val_loss),
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.6}")).unwrap_or_default()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(epoch: usize, val_loss: Option<f64>) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 0.5,
            val_loss,
            lr: 0.001,
            metrics: MetricValues { mse: Some(0.25), mae: Some(0.5), ..Default::default() },
        }
    }

    #[test]
    fn test_is_improvement() {
        let m = row(2, Some(2.3));
        assert!(m.is_improvement(Some(3.0)));
        assert!(!m.is_improvement(Some(2.0)));
        assert!(m.is_improvement(None));
        assert!(!row(1, None).is_improvement(None));
    }

    #[test]
    fn test_rows_leave_missing_values_empty() {
        let tmp    = TempDir::new().unwrap();
        let logger = MetricsLogger::new(tmp.path()).unwrap();
        logger.log(&row(1, None)).unwrap();

        let text  = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "1,0.500000,,0.001000,,,,,0.250000,0.500000");
    }

    #[test]
    fn test_header_written_once() {
        let tmp = TempDir::new().unwrap();
        MetricsLogger::new(tmp.path()).unwrap().log(&row(1, Some(1.0))).unwrap();
        MetricsLogger::new(tmp.path()).unwrap().log(&row(2, Some(0.9))).unwrap();

        let text = fs::read_to_string(tmp.path().join("metrics.csv")).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("epoch")).count(), 1);
        assert_eq!(text.lines().count(), 3);
    }
}
