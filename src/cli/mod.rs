// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and delegates everything else to Layer 2 (application).
//
// Two commands are supported:
//   1. `train` — fits a model described by an experiment file
//   2. `infer` — predicts every raster in an input list
//
// Unrecoverable setup errors bubble out of `run` and end the
// process with a non-zero exit code. Per-file failures do not.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InferArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "geoml",
    version,
    about = "Train segmentation models on imagery and run them over GeoTIFFs."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Infer(args) => run_infer(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training from '{}'", args.config.display());
    let report = TrainUseCase::from_file(&args.config, args.gpu)?.execute()?;

    for row in &report.fit.history {
        println!(
            "epoch {:>3}  train_loss {:.4}  val_loss {}  {}",
            row.epoch,
            row.train_loss,
            row.val_loss.map_or("n/a".to_string(), |l| format!("{l:.4}")),
            row.metrics.describe(),
        );
    }
    if let Some(test) = &report.test {
        println!(
            "test  loss {}  {}",
            test.loss.map_or("n/a".to_string(), |l| format!("{l:.4}")),
            test.metrics.describe(),
        );
    }
    println!(
        "Training complete after {} epoch(s). Checkpoints in '{}'",
        report.fit.epochs,
        report.run_dir.display(),
    );
    Ok(())
}

fn run_infer(args: InferArgs) -> Result<()> {
    use crate::application::infer_use_case::InferUseCase;

    let summary = InferUseCase::new(args.into()).execute()?;

    println!("{} of {} processed, {} failed", summary.processed, summary.total(), summary.failed());
    if let Some(path) = &summary.failure_manifest {
        println!("Failed files listed in '{}'", path.display());
    }
    Ok(())
}
