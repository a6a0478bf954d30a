// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Build the fit splits          (Layer 4 - data)
//   Step 2: Build the model               (Layer 5 - ml)
//   Step 3: Prepare the run directory     (Layer 6 - infra)
//   Step 4: Pick the optimizer            (Layer 5 - ml)
//   Step 5: Fit for max_epochs            (Layer 5 - ml)
//   Step 6: Test stage, when a split exists
//
// Everything lands in <output_dir>/<experiment_name>/, which is
// also the checkpoint directory `infer` is pointed at.
//
// Reference: Burn Book §5 (Training)

use std::path::{Path, PathBuf};

use anyhow::Result;
use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray, Wgpu},
    optim::Optimizer,
    tensor::backend::AutodiffBackend,
};

use crate::application::config::{ExperimentConfig, OptimizerKind};
use crate::data::datamodule::{DataModule, ImageLoader, Stage};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::{
    backend::{select_device, ComputeDevice},
    model::{get_model, SegmentationModel, SegmentationModelConfig},
    optim::{self, LrScheduler},
    trainer::{Evaluation, FitSummary, TrainingTask},
};

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub run_dir: PathBuf,
    pub fit:     FitSummary,
    /// None when there was no split to test on
    pub test:    Option<Evaluation>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: ExperimentConfig,
    gpu:    Option<usize>,
}

impl TrainUseCase {
    pub fn new(config: ExperimentConfig, gpu: Option<usize>) -> Self {
        Self { config, gpu }
    }

    /// Load and validate an experiment file
    pub fn from_file(path: &Path, gpu: Option<usize>) -> Result<Self> {
        Ok(Self::new(ExperimentConfig::load(path)?, gpu))
    }

    pub fn execute(&self) -> Result<TrainReport> {
        match select_device(self.gpu) {
            ComputeDevice::Cpu => {
                tracing::info!("Training on CPU");
                self.run_on::<Autodiff<NdArray>>(&NdArrayDevice::Cpu)
            }
            ComputeDevice::Gpu(device) => {
                tracing::info!("Training on {:?}", device);
                self.run_on::<Autodiff<Wgpu>>(&device)
            }
        }
    }

    fn run_on<B: AutodiffBackend>(&self, device: &B::Device) -> Result<TrainReport> {
        let cfg = &self.config;

        // ── Step 1: Data ──────────────────────────────────────────────────────
        let mut data = DataModule::new(cfg);
        data.setup(Stage::Fit)?;
        let train = data.train_loader::<B>(device)?;
        let val   = data.val_loader::<B::InnerBackend>(device)?;

        // ── Step 2: Model ─────────────────────────────────────────────────────
        let model = get_model::<B>(&cfg.model, device)?;

        // ── Step 3: Run directory ─────────────────────────────────────────────
        let run_dir     = cfg.run_dir();
        let checkpoints = CheckpointManager::create(&run_dir)?;
        checkpoints.save_model_config(&SegmentationModelConfig::from_section(&cfg.model))?;
        let logger = MetricsLogger::new(&run_dir)?;

        tracing::info!(
            "Experiment '{}': {} epochs, batch {}, lr {:.1e}, {:?} / {:?}",
            cfg.experiment_name,
            cfg.max_epochs,
            cfg.batch_size,
            cfg.learning_rate,
            cfg.task.loss,
            cfg.task.optimizer,
        );

        // ── Step 4: Optimizer; each kind is its own type ──────────────────────
        let run = FitRun {
            config:      cfg,
            data:        &mut data,
            checkpoints: &checkpoints,
            logger:      &logger,
            device,
        };
        let wd = cfg.task.weight_decay;
        let (fit, test) = match cfg.task.optimizer {
            OptimizerKind::Adam    => run.fit(model, optim::adam::<B, SegmentationModel<B>>(wd), &train, &val)?,
            OptimizerKind::AdamW   => run.fit(model, optim::adamw::<B, SegmentationModel<B>>(wd), &train, &val)?,
            OptimizerKind::Sgd     => run.fit(model, optim::sgd::<B, SegmentationModel<B>>(wd), &train, &val)?,
            OptimizerKind::RmsProp => run.fit(model, optim::rmsprop::<B, SegmentationModel<B>>(wd), &train, &val)?,
        };

        tracing::info!(
            "Training complete. Best epoch: {}. Checkpoints in '{}', metrics in '{}'",
            fit.best_epoch.map_or("none".to_string(), |e| e.to_string()),
            checkpoints.dir().display(),
            logger.csv_path().display(),
        );
        Ok(TrainReport { run_dir, fit, test })
    }
}

// ─── FitRun ───────────────────────────────────────────────────────────────────
/// Steps 5 and 6, generic over the optimizer type
struct FitRun<'a, B: AutodiffBackend> {
    config:      &'a ExperimentConfig,
    data:        &'a mut DataModule,
    checkpoints: &'a CheckpointManager,
    logger:      &'a MetricsLogger,
    device:      &'a B::Device,
}

impl<B: AutodiffBackend> FitRun<'_, B> {
    fn fit<O>(
        self,
        model:     SegmentationModel<B>,
        optimizer: O,
        train:     &ImageLoader<B>,
        val:       &ImageLoader<B::InnerBackend>,
    ) -> Result<(FitSummary, Option<Evaluation>)>
    where
        O: Optimizer<SegmentationModel<B>, B>,
    {
        let cfg       = self.config;
        let scheduler = LrScheduler::new(cfg.learning_rate, cfg.task.scheduler.clone());
        let mut task  = TrainingTask::new(model, optimizer, cfg.task.loss, scheduler);

        // ── Step 5: Fit ───────────────────────────────────────────────────────
        let summary = task.fit(train, val, cfg.max_epochs, self.checkpoints, self.logger)?;

        // ── Step 6: Test ──────────────────────────────────────────────────────
        let (_, val_size, _) = self.data.split_sizes();
        if val_size == 0 && cfg.data.test_ratio.is_none() {
            tracing::info!("No validation or test split, skipping test stage");
            return Ok((summary, None));
        }
        self.data.setup(Stage::Test)?;
        let test = task.test(&self.data.test_loader::<B::InnerBackend>(self.device)?)?;

        Ok((summary, Some(test)))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    use crate::infra::metrics::HEADER;

    /// Six 4x4 RGB tiles with binary masks, and a config over them
    fn experiment(extra: &str) -> (TempDir, ExperimentConfig) {
        let tmp    = TempDir::new().unwrap();
        let images = tmp.path().join("images");
        let masks  = tmp.path().join("masks");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&masks).unwrap();

        for i in 0..6u8 {
            image::RgbImage::from_pixel(4, 4, image::Rgb([40 * i, 10, 200]))
                .save(images.join(format!("t{i}.png")))
                .unwrap();
            image::GrayImage::from_fn(4, 4, |x, _| image::Luma([(x % 2) as u8]))
                .save(masks.join(format!("t{i}.png")))
                .unwrap();
        }

        let text = format!(
            "experiment_name = \"unit\"\ninput_paths = \"{}\"\ntarget_paths = \"{}\"\noutput_dir = \"{}\"\n\
             n_jobs = 1\nbatch_size = 2\nmax_epochs = 2\nlearning_rate = 0.01\n\
             [model]\nnum_classes = 2\nhidden_channels = 4\n{extra}\
             [data]\nimage_size = [4, 4]\nval_ratio = 0.34\naugment = false\n",
            images.display(),
            masks.display(),
            tmp.path().join("out").display(),
        );
        let cfg = ExperimentConfig::parse(&text).unwrap();
        cfg.validate().unwrap();
        (tmp, cfg)
    }

    #[test]
    fn test_training_writes_checkpoints_and_metrics() {
        let (_tmp, cfg) = experiment("");
        let report = TrainUseCase::new(cfg, None).execute().unwrap();

        assert_eq!(report.fit.epochs, 2);
        assert_eq!(report.fit.history.len(), 2);
        assert!(report.fit.best_epoch.is_some());
        assert!(report.test.is_some());

        let ckpt = CheckpointManager::open(&report.run_dir).unwrap();
        assert_eq!(ckpt.latest_epoch().unwrap(), Some(2));
        assert!(ckpt.load_model_config().is_ok());

        let csv = fs::read_to_string(report.run_dir.join("metrics.csv")).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(HEADER));
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn test_every_optimizer_trains() {
        for name in ["adamw", "sgd", "rmsprop"] {
            let (_tmp, mut cfg) = experiment(&format!("[task]\noptimizer = \"{name}\"\nweight_decay = 0.01\n"));
            cfg.max_epochs = 1;
            let report = TrainUseCase::new(cfg, None).execute().unwrap();
            assert_eq!(report.fit.history.len(), 1, "{name}");
        }
    }

    #[test]
    fn test_no_holdout_skips_test_stage() {
        let (_tmp, mut cfg) = experiment("");
        cfg.data.val_ratio = 0.0;
        cfg.max_epochs     = 1;

        let report = TrainUseCase::new(cfg, None).execute().unwrap();
        assert!(report.test.is_none());
        assert_eq!(report.fit.history[0].val_loss, None);
    }

    #[test]
    fn test_unknown_model_fails_before_training() {
        let (_tmp, mut cfg) = experiment("");
        cfg.model.name = "resnet".to_string();
        let err = TrainUseCase::new(cfg, None).execute().unwrap_err();
        assert!(err.to_string().contains("not implemented"));
    }
}
