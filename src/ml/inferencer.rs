// ============================================================
// Layer 5 — Predictor
// ============================================================
// A trained model, frozen for inference.
//
// Loading:
//   1. model_config.json   → rebuild the architecture
//   2. best/latest epoch   → load its weights (CompactRecorder)
//
// The predictor is a RasterModel, so the batch runner never
// needs to know which architecture it is driving.
use anyhow::Result;
use burn::prelude::*;

use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::{RasterModel, SegmentationModel};

pub struct Predictor<B: Backend> {
    model:  SegmentationModel<B>,
    epoch:  usize,
}

impl<B: Backend> Predictor<B> {
    pub fn from_checkpoint(checkpoints: &CheckpointManager, device: &B::Device) -> Result<Self> {
        let (model, epoch) = checkpoints.load_model::<B>(device)?;
        tracing::info!(
            "Model loaded: {} → {} channels, epoch {}",
            model.in_channels,
            model.num_classes,
            epoch
        );
        Ok(Self { model, epoch })
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn out_channels(&self) -> usize {
        self.model.num_classes
    }
}

impl<B: Backend> RasterModel<B> for Predictor<B> {
    fn in_channels(&self) -> usize {
        self.model.in_channels
    }

    fn forward_raster(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        self.model.forward_raster(images)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use tempfile::TempDir;

    use crate::ml::model::SegmentationModelConfig;

    type B = NdArray;

    #[test]
    fn test_loads_from_checkpoint() {
        let tmp    = TempDir::new().unwrap();
        let ckpt   = CheckpointManager::create(tmp.path()).unwrap();
        let device = Default::default();

        let cfg = SegmentationModelConfig::new(3, 2).with_hidden_channels(4);
        ckpt.save_model_config(&cfg).unwrap();
        ckpt.save_model(&cfg.init::<B>(&device), 4).unwrap();

        let predictor = Predictor::<B>::from_checkpoint(&ckpt, &device).unwrap();
        assert_eq!(predictor.epoch(), 4);
        assert_eq!(predictor.in_channels(), 3);

        let out = predictor.forward_raster(Tensor::zeros([1, 3, 4, 4], &device)).unwrap();
        assert_eq!(out.dims(), [1, 2, 4, 4]);
    }

    #[test]
    fn test_empty_checkpoint_dir_fails() {
        let tmp = TempDir::new().unwrap();
        let ckpt = CheckpointManager::open(tmp.path()).unwrap();
        assert!(Predictor::<B>::from_checkpoint(&ckpt, &Default::default()).is_err());
    }
}
