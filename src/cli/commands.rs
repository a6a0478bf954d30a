// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `infer`, and their
// flags. clap generates --help, missing-argument errors and the
// string → number conversions.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::infer_use_case::{InferConfig, DEFAULT_SUFFIX};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a segmentation model from an experiment file
    Train(TrainArgs),

    /// Run a trained model over a list of GeoTIFFs
    Infer(InferArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Experiment file (TOML)
    #[arg(long)]
    pub config: PathBuf,

    /// Train on this discrete GPU instead of the CPU
    #[arg(long)]
    pub gpu: Option<usize>,
}

#[derive(Args, Debug)]
pub struct InferArgs {
    /// Checkpoint directory written by `train`
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// Text file with one raster path per line
    #[arg(long)]
    pub input_list: PathBuf,

    /// Where predictions and failed_files.json are written
    #[arg(long)]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Reader threads; 0 reads on the main thread
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    /// Run on this discrete GPU instead of the CPU
    #[arg(long)]
    pub gpu: Option<usize>,

    /// Appended to each input's file stem
    #[arg(long, default_value = DEFAULT_SUFFIX)]
    pub file_suffix: String,
}

/// The application layer never sees clap types.
impl From<InferArgs> for InferConfig {
    fn from(a: InferArgs) -> Self {
        InferConfig {
            checkpoint_dir: a.checkpoint,
            input_list:     a.input_list,
            output_dir:     a.output_dir,
            batch_size:     a.batch_size,
            num_workers:    a.num_workers,
            gpu:            a.gpu,
            file_suffix:    a.file_suffix,
            show_progress:  true,
            ..Default::default()
        }
    }
}
