// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Model, losses, metrics, optimizers and the training driver.
// Burn tensors cross into this layer from the data batchers;
// everything above it (application, CLI) deals in configs,
// paths and summaries.
//
// What's in this layer:
//
//   model.rs      — Segmentation model, RasterModel trait and
//                   the get_model registry
//
//   loss.rs       — mse / bce / ce / huber over [N, C, H, W]
//
//   metrics.rs    — Confusion-matrix and regression metrics,
//                   accumulated across batches
//
//   optim.rs      — Optimizer builders and the per-epoch
//                   learning-rate scheduler
//
//   trainer.rs    — TrainingTask: train/validate/test/fit
//
//   inferencer.rs — Predictor: checkpoint → frozen RasterModel
//
//   backend.rs    — CPU/GPU selection with CPU fallback
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Segmentation model and registry
pub mod model;

/// Loss functions
pub mod loss;

/// Evaluation metrics
pub mod metrics;

/// Optimizers and learning-rate schedules
pub mod optim;

/// Training driver with validation and checkpointing
pub mod trainer;

/// Checkpoint-backed predictor for inference
pub mod inferencer;

/// CPU or GPU backend selection
pub mod backend;
