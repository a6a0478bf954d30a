// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder.
//
// Checkpoint directory layout:
//
//   <run_dir>/
//     model_config.json       ← architecture, needed to rebuild the model
//     model_epoch_1.mpk.gz    ← weights after epoch 1
//     model_epoch_2.mpk.gz
//     ...
//     latest_epoch.json       ← number of the last saved epoch
//     best_epoch.json         ← epoch with the lowest val_loss
//     metrics.csv             ← written by MetricsLogger
//
// Inference loads best_epoch when it exists and falls back to
// latest_epoch. A directory without either, or without
// model_config.json, cannot be loaded.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{prelude::*, record::CompactRecorder};

use crate::ml::model::{SegmentationModel, SegmentationModelConfig};

const MODEL_CONFIG: &str = "model_config.json";
const LATEST_EPOCH: &str = "latest_epoch.json";
const BEST_EPOCH:   &str = "best_epoch.json";

/// Manages the files of one checkpoint directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// For training: creates the directory if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// For inference: the directory must already exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        anyhow::ensure!(dir.is_dir(), "Checkpoint directory '{}' not found", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn weights_path(&self, epoch: usize) -> PathBuf {
        // Recorder appends .mpk.gz
        self.dir.join(format!("model_epoch_{epoch}"))
    }

    // ─── Architecture ─────────────────────────────────────────────────────────
    pub fn save_model_config(&self, cfg: &SegmentationModelConfig) -> Result<()> {
        let path = self.dir.join(MODEL_CONFIG);
        fs::write(&path, serde_json::to_string_pretty(cfg)?)
            .with_context(|| format!("Cannot write model config to '{}'", path.display()))?;

        tracing::debug!("Saved model config to '{}'", path.display());
        Ok(())
    }

    pub fn load_model_config(&self) -> Result<SegmentationModelConfig> {
        let path = self.dir.join(MODEL_CONFIG);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read model config from '{}'. Was this directory written by 'train'?",
                path.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed model config '{}'", path.display()))
    }

    // ─── Weights ──────────────────────────────────────────────────────────────
    /// Save weights for `epoch` and point latest_epoch.json at it.
    pub fn save_model<B: Backend>(&self, model: &SegmentationModel<B>, epoch: usize) -> Result<()> {
        let path = self.weights_path(epoch);
        model
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .map_err(|e| anyhow::anyhow!("Failed to save checkpoint to '{}': {e:?}", path.display()))?;

        self.write_epoch(LATEST_EPOCH, epoch)?;
        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Record `epoch` as the best one so far
    pub fn mark_best(&self, epoch: usize) -> Result<()> {
        self.write_epoch(BEST_EPOCH, epoch)
    }

    /// Rebuild the model from model_config.json and load the
    /// weights of the best (else latest) epoch.
    pub fn load_model<B: Backend>(&self, device: &B::Device) -> Result<(SegmentationModel<B>, usize)> {
        let cfg   = self.load_model_config()?;
        let epoch = self.resolve_epoch()?;
        let path  = self.weights_path(epoch);

        tracing::info!("Loading checkpoint '{}' (epoch {})", self.dir.display(), epoch);

        let model = cfg
            .init::<B>(device)
            .load_file(path.clone(), &CompactRecorder::new(), device)
            .map_err(|e| anyhow::anyhow!("Cannot load checkpoint '{}': {e:?}", path.display()))?;
        Ok((model, epoch))
    }

    // ─── Epoch pointers ───────────────────────────────────────────────────────
    pub fn latest_epoch(&self) -> Result<Option<usize>> {
        self.read_epoch(LATEST_EPOCH)
    }

    pub fn best_epoch(&self) -> Result<Option<usize>> {
        self.read_epoch(BEST_EPOCH)
    }

    /// Epoch inference should use
    pub fn resolve_epoch(&self) -> Result<usize> {
        match self.best_epoch()? {
            Some(epoch) => Ok(epoch),
            None => self.latest_epoch()?.with_context(|| {
                format!(
                    "No saved epoch in '{}'. Have you run 'train' first?",
                    self.dir.display()
                )
            }),
        }
    }

    fn write_epoch(&self, name: &str, epoch: usize) -> Result<()> {
        let path = self.dir.join(name);
        fs::write(&path, serde_json::to_string(&epoch)?)
            .with_context(|| format!("Failed to write '{}'", path.display()))
    }

    fn read_epoch(&self, name: &str) -> Result<Option<usize>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        Ok(Some(serde_json::from_str::<usize>(text.trim())?))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use tempfile::TempDir;

    type B = NdArray;

    #[test]
    fn test_open_requires_existing_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(CheckpointManager::open(tmp.path().join("nope")).is_err());
        assert!(CheckpointManager::open(tmp.path()).is_ok());
    }

    #[test]
    fn test_best_epoch_wins_over_latest() {
        let tmp  = TempDir::new().unwrap();
        let ckpt = CheckpointManager::create(tmp.path()).unwrap();

        assert!(ckpt.resolve_epoch().is_err());
        ckpt.write_epoch(LATEST_EPOCH, 5).unwrap();
        assert_eq!(ckpt.resolve_epoch().unwrap(), 5);
        ckpt.mark_best(3).unwrap();
        assert_eq!(ckpt.resolve_epoch().unwrap(), 3);
    }

    #[test]
    fn test_weights_survive_save_and_load() {
        let tmp    = TempDir::new().unwrap();
        let ckpt   = CheckpointManager::create(tmp.path().join("run")).unwrap();
        let device = Default::default();

        let cfg   = SegmentationModelConfig::new(2, 3).with_hidden_channels(4);
        let model = cfg.init::<B>(&device);
        ckpt.save_model_config(&cfg).unwrap();
        ckpt.save_model(&model, 1).unwrap();

        let (loaded, epoch) = ckpt.load_model::<B>(&device).unwrap();
        assert_eq!(epoch, 1);

        let input  = Tensor::<B, 4>::ones([1, 2, 3, 3], &device);
        let before = model.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let after  = loaded.forward(input).into_data().to_vec::<f32>().unwrap();

        // CompactRecorder stores half precision
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert!((b - a).abs() < 5e-2, "{b} vs {a}");
        }
    }

    #[test]
    fn test_missing_model_config_is_an_error() {
        let tmp  = TempDir::new().unwrap();
        let ckpt = CheckpointManager::create(tmp.path()).unwrap();
        ckpt.write_epoch(LATEST_EPOCH, 1).unwrap();
        assert!(ckpt.load_model::<B>(&Default::default()).is_err());
    }
}
