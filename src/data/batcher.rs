// ============================================================
// Layer 4 — Batchers
// ============================================================
// Implements Burn's Batcher trait twice:
//
//   InferenceBatcher  Vec<LoadOutcome> → RasterBatch
//   ImageBatcher      Vec<ImageSample> → ImageBatch<B>
//
// Inference batches hold no tensors. Rasters in one batch may
// disagree in shape, and a stacking error there must fail only
// that batch, so stacking is left to the runner where it can be
// reported. Failed reads ride along in the same batch and are
// counted by the runner.
//
// Training samples are already resized to one shape by the
// Preprocessor, so the ImageBatcher flattens them straight into
// [N, C, H, W] tensors:
//
//   [s1_c1_px.., s1_c2_px.., s2_c1_px.., ...] → [N, C, H, W]
//
// Augmentation (random horizontal flip of image and target
// together) happens here so every epoch sees fresh flips. The
// RNG is derived from the seed plus a counter shared by all
// loader workers. Flips repeat across runs with the same seed
// only when n_jobs is 1; with more workers the batch order
// races on the counter.
//
// Reference: Burn Book §4 (Batcher)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::data::dataset::{ImageSample, LoadOutcome};
use crate::data::preprocessor::flip_horizontal;
use crate::domain::failure::FailureRecord;
use crate::domain::raster::RasterSample;

// ─── RasterBatch ──────────────────────────────────────────────────────────────
/// Rasters read for one inference batch, in input order,
/// plus the reads that failed.
#[derive(Debug, Clone, Default)]
pub struct RasterBatch {
    pub samples:  Vec<RasterSample>,
    pub failures: Vec<FailureRecord>,
}

impl RasterBatch {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct InferenceBatcher;

impl<B: Backend> Batcher<B, LoadOutcome, RasterBatch> for InferenceBatcher {
    fn batch(&self, items: Vec<LoadOutcome>, _device: &B::Device) -> RasterBatch {
        let mut batch = RasterBatch::default();
        for item in items {
            match item {
                LoadOutcome::Loaded(sample)  => batch.samples.push(sample),
                LoadOutcome::Failed(record)  => batch.failures.push(record),
            }
        }
        batch
    }
}

// ─── ImageBatch ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// Inputs — shape: [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,

    /// Targets — shape: [batch_size, target_channels, height, width]
    pub targets: Tensor<B, 4>,
}

// ─── ImageBatcher ─────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    augment: bool,
    seed:    u64,
    counter: Arc<AtomicU64>,
}

impl ImageBatcher {
    /// Batcher for validation/test: samples pass through unchanged
    pub fn plain() -> Self {
        Self { augment: false, seed: 0, counter: Arc::new(AtomicU64::new(0)) }
    }

    /// Batcher for training: random horizontal flips, seeded
    pub fn augmenting(seed: u64) -> Self {
        Self { augment: true, seed, counter: Arc::new(AtomicU64::new(0)) }
    }
}

impl<B: Backend> Batcher<B, ImageSample, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageSample>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let first      = &items[0];
        let (c, tc, h, w) = (first.channels, first.target_channels, first.height, first.width);

        let mut rng = StdRng::seed_from_u64(
            self.seed.wrapping_add(self.counter.fetch_add(1, Ordering::Relaxed)),
        );

        let mut image_flat  = Vec::with_capacity(batch_size * c * h * w);
        let mut target_flat = Vec::with_capacity(batch_size * tc * h * w);

        for item in &items {
            // ── Flip image and target together ────────────────────────────────
            if self.augment && rng.gen_bool(0.5) {
                image_flat.extend(flip_horizontal(&item.image, c, h, w));
                target_flat.extend(flip_horizontal(&item.target, tc, h, w));
            } else {
                image_flat.extend_from_slice(&item.image);
                target_flat.extend_from_slice(&item.target);
            }
        }

        let images  = Tensor::<B, 4>::from_data(TensorData::new(image_flat,  [batch_size, c,  h, w]), device);
        let targets = Tensor::<B, 4>::from_data(TensorData::new(target_flat, [batch_size, tc, h, w]), device);

        ImageBatch { images, targets }
    }
}
