// ============================================================
// Layer 5 — Training Task
// ============================================================
// A training run is an explicit composition:
//
//   TrainingTask
//     ├── SegmentationModel<B>   (B = Autodiff<..>)
//     ├── LossFunction
//     ├── MetricsAggregator      (validation / test only)
//     ├── optimizer O            (Adam / AdamW / SGD / RMSprop)
//     └── LrScheduler            (stepped once per epoch)
//
// Per epoch:
//   train_epoch  forward → loss → backward → optimizer step at lr()
//   validate     model.valid() on the inner backend, no gradients
//   scheduler    step(val_loss)
//   checkpoint   weights + latest_epoch, best_epoch on improvement
//   metrics.csv  one row
//
// Key Burn insight:
//   - Training uses the Autodiff backend for gradients
//   - model.valid() returns the model on B::InnerBackend
//   - Validation/test loaders must therefore produce batches on
//     B::InnerBackend as well
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::config::LossKind;
use crate::data::datamodule::ImageLoader;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::loss::LossFunction;
use crate::ml::metrics::{MetricValues, MetricsAggregator};
use crate::ml::model::SegmentationModel;
use crate::ml::optim::LrScheduler;

/// Mean loss and metrics of one evaluation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// None when the loader yielded no batches
    pub loss:    Option<f64>,
    pub metrics: MetricValues,
}

/// Outcome of `fit`
#[derive(Debug, Clone)]
pub struct FitSummary {
    pub epochs:     usize,
    pub best_epoch: Option<usize>,
    pub history:    Vec<EpochMetrics>,
}

pub struct TrainingTask<B: AutodiffBackend, O> {
    model:     SegmentationModel<B>,
    optimizer: O,
    loss:      LossFunction,
    metrics:   MetricsAggregator,
    scheduler: LrScheduler,
}

impl<B, O> TrainingTask<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<SegmentationModel<B>, B>,
{
    pub fn new(
        model:     SegmentationModel<B>,
        optimizer: O,
        loss_kind: LossKind,
        scheduler: LrScheduler,
    ) -> Self {
        let metrics = MetricsAggregator::new(loss_kind, model.num_classes);
        Self {
            model,
            optimizer,
            loss: LossFunction::from(loss_kind),
            metrics,
            scheduler,
        }
    }

    // ─── Training ─────────────────────────────────────────────────────────────
    /// One pass over the training loader. Returns the mean batch loss
    /// (NaN when the loader is empty).
    pub fn train_epoch(&mut self, loader: &ImageLoader<B>) -> f64 {
        let lr = self.scheduler.lr();
        let mut loss_sum = 0.0f64;
        let mut batches  = 0usize;

        for batch in loader.iter() {
            let outputs = self.model.forward(batch.images);
            let loss    = self.loss.forward(outputs, batch.targets);

            loss_sum += loss.clone().into_scalar().elem::<f64>();
            batches  += 1;

            // Backward pass + optimizer update
            let grads  = loss.backward();
            let grads  = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(lr, self.model.clone(), grads);
        }

        if batches > 0 { loss_sum / batches as f64 } else { f64::NAN }
    }

    // ─── Evaluation ───────────────────────────────────────────────────────────
    pub fn validate(&mut self, loader: &ImageLoader<B::InnerBackend>) -> Result<Evaluation> {
        self.evaluate(loader)
    }

    pub fn test(&mut self, loader: &ImageLoader<B::InnerBackend>) -> Result<Evaluation> {
        let eval = self.evaluate(loader)?;
        tracing::info!(
            "Test: loss={} {}",
            eval.loss.map_or("n/a".to_string(), |l| format!("{l:.4}")),
            eval.metrics.describe(),
        );
        Ok(eval)
    }

    fn evaluate(&mut self, loader: &ImageLoader<B::InnerBackend>) -> Result<Evaluation> {
        // model.valid() → inner backend, no autodiff graph
        let model = self.model.valid();
        self.metrics.reset();

        let mut loss_sum = 0.0f64;
        let mut batches  = 0usize;

        for batch in loader.iter() {
            let outputs = model.forward(batch.images);
            loss_sum += self
                .loss
                .forward(outputs.clone(), batch.targets.clone())
                .into_scalar()
                .elem::<f64>();
            batches += 1;
            self.metrics.update(outputs, batch.targets)?;
        }

        Ok(Evaluation {
            loss:    (batches > 0).then(|| loss_sum / batches as f64),
            metrics: self.metrics.compute(),
        })
    }

    // ─── Fit ──────────────────────────────────────────────────────────────────
    /// Train for `epochs` epochs, validating, checkpointing and
    /// logging after each one.
    pub fn fit(
        &mut self,
        train:       &ImageLoader<B>,
        val:         &ImageLoader<B::InnerBackend>,
        epochs:      usize,
        checkpoints: &CheckpointManager,
        logger:      &MetricsLogger,
    ) -> Result<FitSummary> {
        let mut best_loss: Option<f64>   = None;
        let mut best_epoch: Option<usize> = None;
        let mut history = Vec::with_capacity(epochs);

        for epoch in 1..=epochs {
            let lr         = self.scheduler.lr();
            let train_loss = self.train_epoch(train);
            let eval       = self.validate(val)?;

            let row = EpochMetrics {
                epoch,
                train_loss,
                val_loss: eval.loss,
                lr,
                metrics:  eval.metrics,
            };

            // ── Persist ───────────────────────────────────────────────────────
            checkpoints.save_model(&self.model, epoch)?;
            if row.is_improvement(best_loss) {
                best_loss  = row.val_loss;
                best_epoch = Some(epoch);
                checkpoints.mark_best(epoch)?;
            }
            logger.log(&row)?;

            tracing::info!(
                "Epoch {:>3}/{} | lr={:.2e} | train_loss={:.4} | val_loss={} | {}",
                epoch,
                epochs,
                lr,
                train_loss,
                row.val_loss.map_or("n/a".to_string(), |l| format!("{l:.4}")),
                row.metrics.describe(),
            );

            self.scheduler.step(eval.loss);
            history.push(row);
        }

        Ok(FitSummary { epochs, best_epoch, history })
    }
}
