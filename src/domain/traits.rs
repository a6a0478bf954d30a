// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The inference pipeline reads rasters and writes predictions
// through these two traits, never through a concrete file
// format. That keeps the retry policy independent of the codec,
// and lets tests swap in sources that fail on purpose.
//
//   RasterSource    → GeoTiffSource, RetryingSource<S>
//   PredictionSink  → GeoTiffSink

use std::path::Path;

use anyhow::Result;

use crate::domain::raster::{PredictionRaster, RasterSample};

// ─── RasterSource ─────────────────────────────────────────────────────────────
/// Anything that can turn a path into a RasterSample.
///
/// Sources are shared between data-loading worker threads,
/// hence the Send + Sync bound.
pub trait RasterSource: Send + Sync {
    fn read(&self, path: &Path) -> Result<RasterSample>;
}

// ─── PredictionSink ───────────────────────────────────────────────────────────
/// Anything that can persist a PredictionRaster at a path.
pub trait PredictionSink {
    fn write(&self, raster: &PredictionRaster, path: &Path) -> Result<()>;
}
