// ============================================================
// Layer 4 — DataModule
// ============================================================
// Turns the experiment's input/target directories into train,
// validation and test loaders.
//
//   input_paths/*.{jpg,png,tif,..}  ──┐
//                                     ├─ match by stem ─► decode (rayon)
//   target_paths/*.{png,tif,..}     ──┘                      │
//                                                            ▼
//                                               resize + normalise
//                                                            │
//                                        seeded split (train/val/test)
//                                                            │
//                                                 DataLoaderBuilder
//
// Stages:
//   Fit   split everything into train/val, plus test when
//         data.test_ratio is set
//   Test  reuse the test split, else the validation split, else
//         split off data.test_ratio; with none of those the
//         stage cannot run and a ConfigError is returned
//
// Every image is decoded once and held in memory. Training
// flips happen later, per batch, in the ImageBatcher.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    prelude::*,
};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::application::config::{ConfigError, ExperimentConfig};
use crate::data::batcher::{ImageBatch, ImageBatcher};
use crate::data::dataset::{ImageDataset, ImageSample};
use crate::data::preprocessor::{Normalization, Preprocessor};
use crate::data::splitter::split_by_ratio;
use crate::infra::geotiff::{read_geotiff, GeoTiffReadOptions};

/// Extensions picked up from input directories (case-insensitive)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tif", "tiff"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fit,
    Test,
}

pub type ImageLoader<B> = Arc<dyn DataLoader<B, ImageBatch<B>>>;

// ─── DataModule ───────────────────────────────────────────────────────────────
pub struct DataModule {
    config:       ExperimentConfig,
    preprocessor: Preprocessor,
    train:        Option<Vec<ImageSample>>,
    val:          Option<Vec<ImageSample>>,
    test:         Option<Vec<ImageSample>>,
}

impl DataModule {
    pub fn new(config: &ExperimentConfig) -> Self {
        let [height, width] = config.data.image_size;
        let preprocessor    = Preprocessor::new(
            height,
            width,
            Normalization::for_channels(config.model.in_channels),
        );

        Self {
            config: config.clone(),
            preprocessor,
            train: None,
            val:   None,
            test:  None,
        }
    }

    /// Build the splits a stage needs. Calling a stage twice is a no-op.
    pub fn setup(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::Fit  => self.setup_fit(),
            Stage::Test => self.setup_test(),
        }
    }

    fn setup_fit(&mut self) -> Result<()> {
        if self.train.is_some() {
            return Ok(());
        }
        let samples = self.load_all()?;
        let total   = samples.len();
        let seed    = self.config.random_seed;

        // ── Optional test split first, then validation from the rest ──────────
        let (mut rest, test) = match self.config.data.test_ratio {
            Some(ratio) => {
                let (rest, test) = split_by_ratio(samples, ratio, seed);
                (rest, Some(test))
            }
            // Zero holdout still shuffles with the seed
            None => (split_by_ratio(samples, 0.0, seed).0, None),
        };

        // val_size counts against the full dataset, not what is left
        let val_size = ((total as f64) * self.config.data.val_ratio).floor() as usize;
        let val      = rest.split_off(rest.len() - val_size.min(rest.len()));

        tracing::info!(
            "Fit split: {} train, {} validation, {} test",
            rest.len(),
            val.len(),
            test.as_ref().map_or(0, Vec::len),
        );

        self.train = Some(rest);
        self.val   = Some(val);
        self.test  = test;
        Ok(())
    }

    fn setup_test(&mut self) -> Result<()> {
        if self.test.is_some() {
            return Ok(());
        }
        if let Some(val) = &self.val {
            tracing::info!("Test stage reuses the validation split ({} samples)", val.len());
            self.test = Some(val.clone());
            return Ok(());
        }

        let ratio = self.config.data.test_ratio.ok_or(ConfigError::NoTestSplit)?;
        let (_, test) = split_by_ratio(self.load_all()?, ratio, self.config.random_seed);
        tracing::info!("Test split: {} samples", test.len());
        self.test = Some(test);
        Ok(())
    }

    // ─── Loaders ──────────────────────────────────────────────────────────────
    pub fn train_loader<B: Backend>(&self, device: &B::Device) -> Result<ImageLoader<B>> {
        let samples = self.train.clone().context("train split missing, run setup(Stage::Fit) first")?;
        let batcher = if self.config.data.augment {
            ImageBatcher::augmenting(self.config.random_seed)
        } else {
            ImageBatcher::plain()
        };

        Ok(DataLoaderBuilder::new(batcher)
            .batch_size(self.config.batch_size)
            .shuffle(self.config.random_seed)
            .num_workers(self.config.worker_threads())
            .set_device(device.clone())
            .build(ImageDataset::new(samples)))
    }

    pub fn val_loader<B: Backend>(&self, device: &B::Device) -> Result<ImageLoader<B>> {
        let samples = self.val.clone().context("validation split missing, run setup(Stage::Fit) first")?;
        Ok(self.eval_loader(samples, device))
    }

    pub fn test_loader<B: Backend>(&self, device: &B::Device) -> Result<ImageLoader<B>> {
        let samples = self.test.clone().context("test split missing, run setup(Stage::Test) first")?;
        Ok(self.eval_loader(samples, device))
    }

    fn eval_loader<B: Backend>(&self, samples: Vec<ImageSample>, device: &B::Device) -> ImageLoader<B> {
        DataLoaderBuilder::new(ImageBatcher::plain())
            .batch_size(self.config.batch_size)
            .num_workers(self.config.worker_threads())
            .set_device(device.clone())
            .build(ImageDataset::new(samples))
    }

    pub fn split_sizes(&self) -> (usize, usize, usize) {
        let len = |s: &Option<Vec<ImageSample>>| s.as_ref().map_or(0, Vec::len);
        (len(&self.train), len(&self.val), len(&self.test))
    }

    // ─── Loading ──────────────────────────────────────────────────────────────
    fn load_all(&self) -> Result<Vec<ImageSample>> {
        let pairs = discover_pairs(&self.config.input_paths, &self.config.target_paths)?;
        if pairs.is_empty() {
            anyhow::bail!("No image/target pairs found in {:?}", self.config.input_paths);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads())
            .build()
            .context("Failed to build decoding thread pool")?;

        let pb = ProgressBar::new(pairs.len() as u64);
        pb.set_style(
            ProgressStyle::with_template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let done = AtomicUsize::new(0);
        let expected_channels = self.config.model.in_channels;

        let samples: Vec<ImageSample> = pool.install(|| {
            pairs
                .par_iter()
                .filter_map(|(image, target)| {
                    let result = self.load_pair(image, target, expected_channels);
                    pb.set_position(done.fetch_add(1, Ordering::Relaxed) as u64 + 1);
                    match result {
                        Ok(sample) => Some(sample),
                        Err(e) => {
                            tracing::warn!("Skipping '{}': {:#}", image.display(), e);
                            None
                        }
                    }
                })
                .collect()
        });
        pb.finish_and_clear();

        tracing::info!("Loaded {}/{} image/target pairs", samples.len(), pairs.len());
        if samples.is_empty() {
            anyhow::bail!("None of the {} image/target pairs could be loaded", pairs.len());
        }
        Ok(samples)
    }

    fn load_pair(&self, image: &Path, target: &Path, expected_channels: usize) -> Result<ImageSample> {
        let (img, channels, h, w) = decode_image(image, Some(expected_channels))?;
        anyhow::ensure!(
            channels == expected_channels,
            "has {} bands, model expects {}",
            channels,
            expected_channels
        );

        let (mask, target_channels, th, tw) = decode_mask(target)?;
        let target_bands = self.config.task.loss.target_bands(self.config.model.num_classes);
        anyhow::ensure!(
            target_channels == target_bands,
            "target '{}' has {} bands, {:?} loss expects {}",
            target.display(),
            target_channels,
            self.config.task.loss,
            target_bands
        );

        let (out_h, out_w) = self.preprocessor.output_size();
        Ok(ImageSample {
            image:  self.preprocessor.prepare_image(&img, channels, h, w),
            target: self.preprocessor.prepare_target(&mask, target_channels, th, tw),
            channels,
            target_channels,
            height: out_h,
            width:  out_w,
            path:   image.to_path_buf(),
        })
    }
}

// ─── Discovery ────────────────────────────────────────────────────────────────

/// Image files directly inside `dirs`, sorted. Missing directories are skipped.
pub fn discover_images(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            tracing::warn!("Input directory '{}' not found, skipping", dir.display());
            continue;
        }
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Cannot list '{}'", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Pair every input image with the target sharing its stem.
/// Images without a target are dropped with a warning.
pub fn discover_pairs(inputs: &[PathBuf], targets: &[PathBuf]) -> Result<Vec<(PathBuf, PathBuf)>> {
    let images  = discover_images(inputs)?;
    let targets = discover_images(targets)?;

    let pairs: Vec<(PathBuf, PathBuf)> = images
        .into_iter()
        .filter_map(|image| {
            let stem   = image.file_stem()?.to_os_string();
            let target = targets.iter().find(|t| t.file_stem() == Some(stem.as_os_str()));
            match target {
                Some(t) => Some((image, t.clone())),
                None => {
                    tracing::warn!("No target for '{}', skipping", image.display());
                    None
                }
            }
        })
        .collect();

    Ok(pairs)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_tiff(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("tif") | Some("tiff")
    )
}

// ─── Decoding ─────────────────────────────────────────────────────────────────

/// Decode an input image as (channel-major pixels, channels, height, width).
/// jpg/png become RGB scaled to [0, 1]; GeoTIFFs keep their sample values.
fn decode_image(path: &Path, band_limit: Option<usize>) -> Result<(Vec<f32>, usize, usize, usize)> {
    if is_tiff(path) {
        let options = GeoTiffReadOptions { band_limit, ..Default::default() };
        let sample  = read_geotiff(path, &options)?;
        let [c, h, w] = sample.shape();
        return Ok((sample.pixels().to_vec(), c, h, w));
    }

    let rgb = image::open(path)
        .with_context(|| format!("Cannot decode '{}'", path.display()))?
        .to_rgb8();
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);

    let mut out = vec![0.0f32; 3 * h * w];
    for (i, px) in rgb.pixels().enumerate() {
        for c in 0..3 {
            out[c * h * w + i] = px.0[c] as f32 / 255.0;
        }
    }
    Ok((out, 3, h, w))
}

/// Decode a target mask. Raster masks keep every band; jpg/png
/// masks are read as single-band luma without rescaling, so a
/// pixel value is its class index.
fn decode_mask(path: &Path) -> Result<(Vec<f32>, usize, usize, usize)> {
    if is_tiff(path) {
        return decode_image(path, None);
    }

    let luma = image::open(path)
        .with_context(|| format!("Cannot decode '{}'", path.display()))?
        .to_luma8();
    let (w, h) = (luma.width() as usize, luma.height() as usize);
    Ok((luma.pixels().map(|p| p.0[0] as f32).collect(), 1, h, w))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use burn::backend::NdArray;
    use tempfile::TempDir;

    use crate::application::config::ExperimentConfig;
    use crate::domain::raster::{GeoTransform, Georeference};
    use crate::infra::geotiff::{write_geotiff, GeoTiffWriteOptions};

    /// Writes `n` 4x4 RGB images and matching masks
    fn fixture(n: usize) -> (TempDir, ExperimentConfig) {
        let tmp    = TempDir::new().unwrap();
        let images = tmp.path().join("images");
        let masks  = tmp.path().join("masks");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&masks).unwrap();

        for i in 0..n {
            image::RgbImage::from_pixel(4, 4, image::Rgb([i as u8, 0, 255]))
                .save(images.join(format!("tile_{i:02}.png")))
                .unwrap();
            image::GrayImage::from_pixel(4, 4, image::Luma([(i % 2) as u8]))
                .save(masks.join(format!("tile_{i:02}.png")))
                .unwrap();
        }

        let text = format!(
            "experiment_name = \"dm\"\ninput_paths = \"{}\"\ntarget_paths = [\"{}\"]\noutput_dir = \"{}\"\n\
             n_jobs = 2\nbatch_size = 3\n[model]\nnum_classes = 2\n[data]\nimage_size = [2, 2]\n",
            images.display(),
            masks.display(),
            tmp.path().join("out").display(),
        );
        let cfg = ExperimentConfig::parse(&text).unwrap();
        (tmp, cfg)
    }

    #[test]
    fn test_discovery_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        for name in ["b.TIF", "a.png", "notes.txt", "c.jpeg"] {
            fs::write(tmp.path().join(name), b"").unwrap();
        }
        let found = discover_images(&[tmp.path().to_path_buf(), tmp.path().join("missing")]).unwrap();
        let names: Vec<_> = found.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["a.png", "b.TIF", "c.jpeg"]);
    }

    #[test]
    fn test_unmatched_images_are_skipped() {
        let (tmp, cfg) = fixture(3);
        fs::remove_file(tmp.path().join("masks").join("tile_01.png")).unwrap();

        let pairs = discover_pairs(&cfg.input_paths, &cfg.target_paths).unwrap();
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_fit_split_sizes() {
        let (_tmp, mut cfg) = fixture(10);
        cfg.data.val_ratio  = 0.25;
        cfg.data.test_ratio = Some(0.1);

        let mut dm = DataModule::new(&cfg);
        dm.setup(Stage::Fit).unwrap();
        // floor(10 * 0.1) = 1 test, floor(10 * 0.25) = 2 validation
        assert_eq!(dm.split_sizes(), (7, 2, 1));
    }

    #[test]
    fn test_test_stage_reuses_validation() {
        let (_tmp, cfg) = fixture(10);
        let mut dm = DataModule::new(&cfg);
        dm.setup(Stage::Fit).unwrap();
        dm.setup(Stage::Test).unwrap();

        let (_, val, test) = dm.split_sizes();
        assert_eq!(val, 2);
        assert_eq!(test, 2);
    }

    #[test]
    fn test_test_stage_without_any_split_is_a_config_error() {
        let (_tmp, cfg) = fixture(4);
        let mut dm = DataModule::new(&cfg);

        let err = dm.setup(Stage::Test).unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::NoTestSplit)));
    }

    #[test]
    fn test_test_stage_splits_by_test_ratio() {
        let (_tmp, mut cfg) = fixture(10);
        cfg.data.test_ratio = Some(0.3);
        let mut dm = DataModule::new(&cfg);
        dm.setup(Stage::Test).unwrap();
        assert_eq!(dm.split_sizes(), (0, 0, 3));
    }

    #[test]
    fn test_multi_band_mask_is_skipped_for_cross_entropy() {
        let (tmp, cfg) = fixture(3);
        let mask = tmp.path().join("masks").join("tile_01.png");
        fs::remove_file(&mask).unwrap();
        let georef = Georeference::new(None, GeoTransform::IDENTITY, 4, 4);
        write_geotiff(
            &tmp.path().join("masks").join("tile_01.tif"),
            &[1.0; 3 * 16],
            3,
            &georef,
            &GeoTiffWriteOptions::default(),
        )
        .unwrap();

        let dm = DataModule::new(&cfg);
        let err = dm
            .load_pair(
                &tmp.path().join("images").join("tile_01.png"),
                &tmp.path().join("masks").join("tile_01.tif"),
                3,
            )
            .unwrap_err();
        assert!(err.to_string().contains("has 3 bands"), "{err}");

        // The other two pairs still load
        let mut dm = DataModule::new(&cfg);
        dm.setup(Stage::Fit).unwrap();
        let (train, val, _) = dm.split_sizes();
        assert_eq!(train + val, 2);
    }

    #[test]
    fn test_loader_yields_resized_batches() {
        let (_tmp, cfg) = fixture(6);
        let mut dm = DataModule::new(&cfg);
        dm.setup(Stage::Fit).unwrap();

        let device = Default::default();
        let loader = dm.train_loader::<NdArray>(&device).unwrap();

        let mut seen = 0;
        for batch in loader.iter() {
            let [n, c, h, w] = batch.images.dims();
            assert_eq!((c, h, w), (3, 2, 2));
            assert_eq!(batch.targets.dims(), [n, 1, 2, 2]);
            seen += n;
        }
        // 6 samples, floor(6 * 0.2) = 1 held out for validation
        assert_eq!(seen, 5);
    }
}
