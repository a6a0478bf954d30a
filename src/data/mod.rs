// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Two pipelines share this layer.
//
// Inference (one pass over a manifest of rasters):
//
//   paths from the input manifest
//       │
//       ▼
//   RetryingSource     → GeoTIFF read with bounded retries
//       │
//       ▼
//   InferenceDataset   → Burn Dataset of LoadOutcome (sample or failure)
//       │
//       ▼
//   InferenceBatcher   → groups outcomes into RasterBatch
//       │
//       ▼
//   DataLoader         → worker threads feed the runner in order
//
// Training (image/target pairs from directories):
//
//   DataModule         → discovery, parallel decoding, seeded splits
//       │
//       ▼
//   Preprocessor       → resize, normalise
//       │
//       ▼
//   ImageDataset       → Burn Dataset of ImageSample
//       │
//       ▼
//   ImageBatcher       → [N, C, H, W] tensors, random flips
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Raster I/O settings and the retrying reader
pub mod loader;

/// Resize, normalisation and flip helpers
pub mod preprocessor;

/// Burn Dataset implementations for inference and training
pub mod dataset;

/// Burn Batcher implementations
pub mod batcher;

/// Seeded holdout splitting
pub mod splitter;

/// Discovery, splits and loaders for an experiment
pub mod datamodule;
