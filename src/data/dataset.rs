use std::path::PathBuf;
use std::sync::Arc;

use burn::data::dataset::Dataset;

use crate::domain::failure::FailureRecord;
use crate::domain::raster::RasterSample;
use crate::domain::traits::RasterSource;

// ─── Inference ────────────────────────────────────────────────────────────────

/// Result of reading one manifest entry.
///
/// Burn's data loader stops iterating at the first `None` from
/// `Dataset::get`, so a failed read is carried as a value instead.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded(RasterSample),
    Failed(FailureRecord),
}

/// Lazily reads rasters from a list of paths. Reads happen inside
/// the loader's worker threads.
pub struct InferenceDataset {
    paths:  Vec<PathBuf>,
    source: Arc<dyn RasterSource>,
}

impl InferenceDataset {
    pub fn new(paths: Vec<PathBuf>, source: Arc<dyn RasterSource>) -> Self {
        Self { paths, source }
    }
}

impl Dataset<LoadOutcome> for InferenceDataset {
    fn get(&self, index: usize) -> Option<LoadOutcome> {
        let path = self.paths.get(index)?;
        let outcome = match self.source.read(path) {
            Ok(sample) => LoadOutcome::Loaded(sample),
            Err(e)     => LoadOutcome::Failed(FailureRecord::new(path.display().to_string(), format!("{e:#}"))),
        };
        Some(outcome)
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

// ─── Training ─────────────────────────────────────────────────────────────────

/// One preprocessed training example.
/// Image and target are channel-major and share height/width.
#[derive(Debug, Clone)]
pub struct ImageSample {
    pub image:           Vec<f32>,
    pub target:          Vec<f32>,
    pub channels:        usize,
    pub target_channels: usize,
    pub height:          usize,
    pub width:           usize,
    pub path:            PathBuf,
}

pub struct ImageDataset {
    samples: Vec<ImageSample>,
}

impl ImageDataset {
    pub fn new(samples: Vec<ImageSample>) -> Self { Self { samples } }
}

impl Dataset<ImageSample> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
