// ============================================================
// Layer 2 — InferUseCase
// ============================================================
// Runs a trained model over every raster named in a manifest
// and writes one georeferenced prediction per input:
//
//   Step 1: Read the input manifest       (Layer 6 - infra)  fatal if missing
//   Step 2: Load the checkpoint           (Layer 5 - ml)     fatal if missing
//   Step 3: Stream batches from loaders   (Layer 4 - data)   reads retried
//   Step 4: Forward pass per batch        (Layer 5 - ml)     batch fails as a unit
//   Step 5: Write each prediction         (Layer 6 - infra)  file fails alone
//   Step 6: Persist failed_files.json     (Layer 6 - infra)  only if needed
//
// Every path in the manifest ends up either written or listed
// as a failure, so processed + failed == N.
//
// Backend: CPU (NdArray) by default, Wgpu on the requested
// discrete GPU when one is given and available.
//
// Reference: Burn Book §4 (DataLoader), §6 (Backends)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, NdArray, Wgpu},
    data::dataloader::DataLoaderBuilder,
    prelude::*,
    tensor::TensorData,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::data::batcher::{InferenceBatcher, RasterBatch};
use crate::data::dataset::{InferenceDataset, LoadOutcome};
use crate::data::loader::RasterIoConfig;
use crate::domain::failure::{FailureRecord, RunSummary};
use crate::domain::raster::{PredictionRaster, RasterSample};
use crate::domain::traits::{PredictionSink, RasterSource};
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::geotiff::GeoTiffSink;
use crate::infra::manifest::{read_input_manifest, write_failure_manifest};
use crate::ml::backend::{select_device, ComputeDevice};
use crate::ml::inferencer::Predictor;
use crate::ml::model::RasterModel;

pub const DEFAULT_SUFFIX: &str = "_prediction.tif";

// ─── Inference Configuration ──────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct InferConfig {
    pub checkpoint_dir: PathBuf,
    pub input_list:     PathBuf,
    pub output_dir:     PathBuf,
    pub batch_size:     usize,
    pub num_workers:    usize,
    /// None runs on the CPU
    pub gpu:            Option<usize>,
    pub file_suffix:    String,
    pub io:             RasterIoConfig,
    pub show_progress:  bool,
}

impl Default for InferConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            input_list:     PathBuf::from("files.txt"),
            output_dir:     PathBuf::from("predictions"),
            batch_size:     1,
            num_workers:    4,
            gpu:            None,
            file_suffix:    DEFAULT_SUFFIX.to_string(),
            io:             RasterIoConfig::default(),
            show_progress:  false,
        }
    }
}

// ─── InferUseCase ─────────────────────────────────────────────────────────────
pub struct InferUseCase {
    config: InferConfig,
}

impl InferUseCase {
    pub fn new(config: InferConfig) -> Self {
        Self { config }
    }

    /// Pick the backend and run the whole manifest
    pub fn execute(&self) -> Result<RunSummary> {
        match select_device(self.config.gpu) {
            ComputeDevice::Cpu => {
                tracing::info!("Running inference on CPU");
                self.run_on::<NdArray>(&NdArrayDevice::Cpu)
            }
            ComputeDevice::Gpu(device) => {
                tracing::info!("Running inference on {:?}", device);
                self.run_on::<Wgpu>(&device)
            }
        }
    }

    fn run_on<B: Backend>(&self, device: &B::Device) -> Result<RunSummary> {
        let cfg = &self.config;

        // ── Step 1: Input manifest ────────────────────────────────────────────
        let paths = read_input_manifest(&cfg.input_list)?;
        tracing::info!("{} rasters listed in '{}'", paths.len(), cfg.input_list.display());

        // ── Step 2: Model ─────────────────────────────────────────────────────
        let checkpoints = CheckpointManager::open(&cfg.checkpoint_dir)?;
        let predictor   = Predictor::<B>::from_checkpoint(&checkpoints, device)?;
        tracing::info!(
            "Predicting {} band(s) per raster with epoch {} weights",
            predictor.out_channels(),
            predictor.epoch(),
        );

        // ── Steps 3-6: Batch loop ─────────────────────────────────────────────
        let runner = BatchRunner {
            source:        Arc::new(cfg.io.loader()),
            sink:          Box::new(GeoTiffSink::new(cfg.io.write_options())),
            output_dir:    cfg.output_dir.clone(),
            file_suffix:   cfg.file_suffix.clone(),
            batch_size:    cfg.batch_size,
            num_workers:   cfg.num_workers,
            show_progress: cfg.show_progress,
        };
        runner.run(&predictor, paths, device)
    }
}

// ─── BatchRunner ──────────────────────────────────────────────────────────────
/// The batch loop, independent of where rasters come from, where
/// predictions go and which model produces them.
pub struct BatchRunner {
    pub source:        Arc<dyn RasterSource>,
    pub sink:          Box<dyn PredictionSink>,
    pub output_dir:    PathBuf,
    pub file_suffix:   String,
    pub batch_size:    usize,
    pub num_workers:   usize,
    pub show_progress: bool,
}

impl BatchRunner {
    pub fn run<B, M>(&self, model: &M, paths: Vec<PathBuf>, device: &B::Device) -> Result<RunSummary>
    where
        B: Backend,
        M: RasterModel<B>,
    {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Cannot create output directory '{}'", self.output_dir.display()))?;

        let total       = paths.len();
        let mut summary = RunSummary::default();
        if total == 0 {
            tracing::info!("Nothing to process");
            return Ok(summary);
        }

        // ── Loader ────────────────────────────────────────────────────────────
        // Zero workers reads on this thread; more than one worker per
        // file would leave threads idle
        let mut builder = DataLoaderBuilder::<B, LoadOutcome, RasterBatch>::new(InferenceBatcher)
            .batch_size(self.batch_size.max(1))
            .set_device(device.clone());
        let workers = self.num_workers.min(total);
        if workers > 0 {
            builder = builder.num_workers(workers);
        }
        let loader = builder.build(InferenceDataset::new(paths, self.source.clone()));

        let progress = self.progress_bar(total);

        // Output path → input that produced it in this run
        let mut written: HashMap<PathBuf, PathBuf> = HashMap::new();

        for mut batch in loader.iter() {
            progress.inc((batch.samples.len() + batch.failures.len()) as u64);
            summary.failures.append(&mut batch.failures);

            // ── Every read in this batch failed ───────────────────────────────
            if batch.is_empty() {
                tracing::debug!("Skipping batch with no readable rasters");
                continue;
            }

            // ── Forward pass: the batch succeeds or fails as a whole ──────────
            let predictions = match predict_batch(model, &batch.samples, device) {
                Ok(predictions) => predictions,
                Err(e) => {
                    tracing::warn!("Batch of {} failed: {:#}", batch.samples.len(), e);
                    summary.failures.extend(
                        batch.samples.iter().map(|s| FailureRecord::new(path_string(s.path()), format!("{e:#}"))),
                    );
                    continue;
                }
            };

            // ── Writes: each file on its own ──────────────────────────────────
            for (sample, prediction) in batch.samples.iter().zip(&predictions) {
                let out = self.output_path(sample);

                // Same stem from another directory: keep the first prediction
                if let Some(first) = written.get(&out) {
                    tracing::warn!(
                        "'{}' would overwrite the prediction of '{}'",
                        sample.path().display(),
                        first.display()
                    );
                    summary.failures.push(FailureRecord::new(
                        path_string(sample.path()),
                        format!("output '{}' already written for '{}'", out.display(), first.display()),
                    ));
                    continue;
                }

                match self.sink.write(prediction, &out) {
                    Ok(()) => {
                        tracing::debug!("Wrote '{}'", out.display());
                        written.insert(out, sample.path().to_path_buf());
                        summary.processed += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Cannot write prediction for '{}': {:#}", sample.path().display(), e);
                        summary.failures.push(FailureRecord::new(path_string(sample.path()), format!("{e:#}")));
                    }
                }
            }
        }
        progress.finish_and_clear();

        summary.failure_manifest = write_failure_manifest(&self.output_dir, &summary.failures)?;

        tracing::info!("Inference done: {} processed, {} failed", summary.processed, summary.failed());
        Ok(summary)
    }

    /// `{output_dir}/{input stem}{suffix}`
    pub fn output_path(&self, sample: &RasterSample) -> PathBuf {
        self.output_dir.join(format!("{}{}", sample.stem(), self.file_suffix))
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    }
}

// ─── Forward pass ─────────────────────────────────────────────────────────────
/// Stack a batch, run the model and split the output back into
/// one PredictionRaster per sample.
fn predict_batch<B, M>(model: &M, samples: &[RasterSample], device: &B::Device) -> Result<Vec<PredictionRaster>>
where
    B: Backend,
    M: RasterModel<B>,
{
    let n = samples.len();
    let [bands, height, width] = samples[0].shape();

    // ── Stackable? ────────────────────────────────────────────────────────────
    if let Some(odd) = samples.iter().find(|s| s.shape() != [bands, height, width]) {
        anyhow::bail!(
            "cannot stack '{}' {:?} with '{}' {:?}",
            odd.path().display(),
            odd.shape(),
            samples[0].path().display(),
            samples[0].shape(),
        );
    }
    anyhow::ensure!(
        bands == model.in_channels(),
        "rasters have {} bands, model expects {}",
        bands,
        model.in_channels()
    );

    let mut flat = Vec::with_capacity(n * bands * height * width);
    for sample in samples {
        flat.extend_from_slice(sample.pixels());
    }
    let input = Tensor::<B, 4>::from_data(TensorData::new(flat, [n, bands, height, width]), device);

    // ── Forward ───────────────────────────────────────────────────────────────
    let output = model.forward_raster(input)?;
    let [out_n, out_c, out_h, out_w] = output.dims();
    anyhow::ensure!(
        out_n == n && out_h == height && out_w == width,
        "model output {:?} does not match input grid [{}, _, {}, {}]",
        [out_n, out_c, out_h, out_w],
        n,
        height,
        width,
    );

    let values = output
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Cannot read model output: {e:?}"))?;

    // ── Split per sample; georeferencing copied from each source ──────────────
    samples
        .iter()
        .zip(values.chunks_exact(out_c * height * width))
        .map(|(sample, chunk)| PredictionRaster::from_source(sample, chunk.to_vec(), out_c))
        .collect()
}

fn path_string(path: &Path) -> String {
    path.display().to_string()
}
