// ============================================================
// Layer 2 — Experiment Configuration
// ============================================================
// One TOML file describes a whole training experiment:
//
//   experiment_name = "hello_world"
//   input_paths     = ["data/images"]
//   target_paths    = ["data/masks"]
//
//   [model]
//   in_channels = 3
//   num_classes = 2
//
//   [task]
//   loss      = "ce"
//   optimizer = "adamw"
//
//   [task.scheduler]
//   name  = "cosine"
//   t_max = 20
//
//   [data]
//   val_ratio  = 0.2
//   image_size = [224, 224]
//
// Every section and most fields have defaults. Unknown loss,
// optimizer or scheduler names fail at parse time (serde enums);
// everything else is checked by validate(), which returns a
// typed ConfigError.
//
// Reference: serde and toml crate documentation

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

// ─── ConfigError ──────────────────────────────────────────────────────────────
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no input paths configured")]
    NoInputs,

    #[error("path '{0}' does not exist")]
    MissingPath(PathBuf),

    #[error("{name} must be in [0, 1), got {value}")]
    RatioOutOfRange { name: &'static str, value: f64 },

    #[error("val_ratio + test_ratio must be below 1, got {0}")]
    RatiosTooLarge(f64),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("learning_rate must be positive, got {0}")]
    LearningRate(f64),

    #[error("cross-entropy loss needs num_classes >= 2, got {0}")]
    TooFewClasses(usize),

    #[error("test stage needs a validation split or data.test_ratio")]
    NoTestSplit,

    #[error("cannot create output directory '{path}'")]
    OutputDir {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ─── Enumerated choices ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    Mse,
    /// Binary cross-entropy on logits
    Bce,
    /// Cross-entropy over class channels
    Ce,
    Huber,
}

impl LossKind {
    /// Bands a target must carry. `ce` reads one band of class
    /// indices; the others compare against every output channel.
    pub fn target_bands(self, num_classes: usize) -> usize {
        match self {
            Self::Ce => 1,
            Self::Mse | Self::Bce | Self::Huber => num_classes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    AdamW,
    Sgd,
    RmsProp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum SchedulerConfig {
    #[serde(rename = "none")]
    Constant,
    Cosine {
        #[serde(default = "default_t_max")]
        t_max:   usize,
        #[serde(default = "default_eta_min")]
        eta_min: f64,
    },
    Plateau {
        #[serde(default = "default_patience")]
        patience: usize,
        #[serde(default = "default_factor")]
        factor:   f64,
    },
    Step {
        #[serde(default = "default_step_size")]
        step_size: usize,
        #[serde(default = "default_gamma")]
        gamma:     f64,
    },
}

impl Default for SchedulerConfig {
    fn default() -> Self { Self::Constant }
}

fn default_t_max()     -> usize { 10 }
fn default_eta_min()   -> f64   { 1e-6 }
fn default_patience()  -> usize { 10 }
fn default_factor()    -> f64   { 0.1 }
fn default_step_size() -> usize { 30 }
fn default_gamma()     -> f64   { 0.1 }

// ─── Sections ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub name:            String,
    pub in_channels:     usize,
    pub num_classes:     usize,
    pub hidden_channels: usize,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            name:            "custom".to_string(),
            in_channels:     3,
            num_classes:     1,
            hidden_channels: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSection {
    pub loss:         LossKind,
    pub optimizer:    OptimizerKind,
    pub weight_decay: f64,
    pub scheduler:    SchedulerConfig,
}

impl Default for TaskSection {
    fn default() -> Self {
        Self {
            loss:         LossKind::Ce,
            optimizer:    OptimizerKind::Adam,
            weight_decay: 0.0,
            scheduler:    SchedulerConfig::Constant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub val_ratio:  f64,
    pub test_ratio: Option<f64>,
    /// (height, width) every image is resized to
    pub image_size: [usize; 2],
    pub augment:    bool,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            val_ratio:  0.2,
            test_ratio: None,
            image_size: [224, 224],
            augment:    true,
        }
    }
}

// ─── ExperimentConfig ─────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub experiment_name: String,

    /// A single directory or a list of directories
    #[serde(deserialize_with = "one_or_many")]
    pub input_paths: Vec<PathBuf>,

    /// Mask directories; targets are matched to images by file stem
    #[serde(default)]
    pub target_paths: Vec<PathBuf>,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_seed")]
    pub random_seed: u64,

    /// Loader threads; zero or negative means every core
    #[serde(default = "default_n_jobs")]
    pub n_jobs: i64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,

    #[serde(default)]
    pub model: ModelSection,

    #[serde(default)]
    pub task: TaskSection,

    #[serde(default)]
    pub data: DataSection,
}

fn default_output_dir()    -> PathBuf { PathBuf::from("outputs") }
fn default_seed()          -> u64     { 42 }
fn default_n_jobs()        -> i64     { -1 }
fn default_batch_size()    -> usize   { 32 }
fn default_learning_rate() -> f64     { 1e-3 }
fn default_max_epochs()    -> usize   { 10 }

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<PathBuf>, D::Error> {
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path)   => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}

impl ExperimentConfig {
    /// Read, parse and validate an experiment file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config '{}'", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("Invalid config '{}'", path.display()))?;
        config.validate()?;

        tracing::info!("Loaded experiment '{}' from '{}'", config.experiment_name, path.display());
        Ok(config)
    }

    /// Parse TOML without validating
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Check every value and create the output directory.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        // ── Paths ─────────────────────────────────────────────────────────────
        if self.input_paths.is_empty() {
            return Err(ConfigError::NoInputs);
        }
        if let Some(missing) = self
            .input_paths
            .iter()
            .chain(&self.target_paths)
            .find(|p| !p.exists())
        {
            return Err(ConfigError::MissingPath(missing.clone()));
        }

        // ── Ratios ────────────────────────────────────────────────────────────
        check_ratio("data.val_ratio", self.data.val_ratio)?;
        if let Some(test) = self.data.test_ratio {
            check_ratio("data.test_ratio", test)?;
            let sum = self.data.val_ratio + test;
            if sum >= 1.0 {
                return Err(ConfigError::RatiosTooLarge(sum));
            }
        }

        // ── Hyperparameters ───────────────────────────────────────────────────
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch_size"));
        }
        if self.max_epochs == 0 {
            return Err(ConfigError::Zero("max_epochs"));
        }
        // Written this way round so NaN is rejected too
        if !(self.learning_rate > 0.0) {
            return Err(ConfigError::LearningRate(self.learning_rate));
        }
        if self.data.image_size.contains(&0) {
            return Err(ConfigError::Zero("data.image_size"));
        }

        // ── Model ─────────────────────────────────────────────────────────────
        if self.model.in_channels == 0 {
            return Err(ConfigError::Zero("model.in_channels"));
        }
        if self.model.num_classes == 0 {
            return Err(ConfigError::Zero("model.num_classes"));
        }
        if self.task.loss == LossKind::Ce && self.model.num_classes < 2 {
            return Err(ConfigError::TooFewClasses(self.model.num_classes));
        }

        fs::create_dir_all(&self.output_dir).map_err(|source| ConfigError::OutputDir {
            path: self.output_dir.clone(),
            source,
        })?;

        Ok(())
    }

    /// Directory holding this experiment's checkpoints and metrics
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(&self.experiment_name)
    }

    /// Resolved loader thread count
    pub fn worker_threads(&self) -> usize {
        if self.n_jobs > 0 {
            self.n_jobs as usize
        } else {
            rayon::current_num_threads()
        }
    }
}

fn check_ratio(name: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::RatioOutOfRange { name, value })
    }
}
