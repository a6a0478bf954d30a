// ============================================================
// Layer 5 — Metrics Aggregator
// ============================================================
// Accumulates per-pixel metrics across the batches of one
// validation or test pass.
//
// Classification (ce, bce):
//   a confusion matrix over classes, from which
//     accuracy  = correct / total
//     precision, recall, F1  macro-averaged over every class
//                            that occurs in targets or predictions
//   ce   predicted class = argmax over the class channels
//   bce  each output channel is its own binary problem,
//        predicted 1 when the logit is > 0 (sigmoid > 0.5)
//
// Regression (mse, huber):
//   MSE and MAE over all output values
//
// Tensors are pulled to host memory once per batch; the
// accumulation itself is plain Rust.

use anyhow::Result;
use burn::prelude::*;

use crate::application::config::LossKind;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricValues {
    pub accuracy:  Option<f64>,
    pub precision: Option<f64>,
    pub recall:    Option<f64>,
    pub f1:        Option<f64>,
    pub mse:       Option<f64>,
    pub mae:       Option<f64>,
}

impl MetricValues {
    /// Short human-readable form for epoch lines
    pub fn describe(&self) -> String {
        let parts: Vec<String> = [
            ("acc", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1", self.f1),
            ("mse", self.mse),
            ("mae", self.mae),
        ]
        .iter()
        .filter_map(|(name, v)| v.map(|v| format!("{name}={v:.4}")))
        .collect();
        parts.join(" | ")
    }
}

#[derive(Debug, Clone)]
enum Accumulator {
    Confusion { classes: usize, counts: Vec<u64> },
    Regression { sq_err: f64, abs_err: f64, count: u64 },
}

#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    loss: LossKind,
    acc:  Accumulator,
}

impl MetricsAggregator {
    pub fn new(loss: LossKind, num_classes: usize) -> Self {
        let acc = match loss {
            LossKind::Ce  => Accumulator::Confusion { classes: num_classes, counts: vec![0; num_classes * num_classes] },
            LossKind::Bce => Accumulator::Confusion { classes: 2, counts: vec![0; 4] },
            LossKind::Mse | LossKind::Huber => Accumulator::Regression { sq_err: 0.0, abs_err: 0.0, count: 0 },
        };
        Self { loss, acc }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.loss, self.classes());
    }

    fn classes(&self) -> usize {
        match &self.acc {
            Accumulator::Confusion { classes, .. } => *classes,
            Accumulator::Regression { .. }         => 0,
        }
    }

    /// Add one batch of model outputs [N, C, H, W] and targets.
    pub fn update<B: Backend>(&mut self, outputs: Tensor<B, 4>, targets: Tensor<B, 4>) -> Result<()> {
        match self.loss {
            LossKind::Ce => {
                let preds  = to_vec(outputs.argmax(1).float())?;
                let labels = to_vec(targets)?;
                self.update_classes(&as_classes(&preds), &as_classes(&labels));
            }
            LossKind::Bce => {
                let preds  = to_vec(outputs.greater_elem(0.0).float())?;
                let labels = to_vec(targets.greater_elem(0.5).float())?;
                self.update_classes(&as_classes(&preds), &as_classes(&labels));
            }
            LossKind::Mse | LossKind::Huber => {
                let preds  = to_vec(outputs)?;
                let values = to_vec(targets)?;
                self.update_regression(&preds, &values);
            }
        }
        Ok(())
    }

    /// Add class predictions. Labels outside the class range are ignored.
    pub fn update_classes(&mut self, predicted: &[usize], actual: &[usize]) {
        if let Accumulator::Confusion { classes, counts } = &mut self.acc {
            for (&p, &a) in predicted.iter().zip(actual) {
                if p < *classes && a < *classes {
                    counts[a * *classes + p] += 1;
                }
            }
        }
    }

    pub fn update_regression(&mut self, predicted: &[f32], actual: &[f32]) {
        if let Accumulator::Regression { sq_err, abs_err, count } = &mut self.acc {
            for (&p, &a) in predicted.iter().zip(actual) {
                let d = (p - a) as f64;
                *sq_err  += d * d;
                *abs_err += d.abs();
                *count   += 1;
            }
        }
    }

    pub fn compute(&self) -> MetricValues {
        match &self.acc {
            Accumulator::Confusion { classes, counts } => confusion_metrics(*classes, counts),
            Accumulator::Regression { sq_err, abs_err, count } => {
                if *count == 0 {
                    return MetricValues::default();
                }
                MetricValues {
                    mse: Some(sq_err / *count as f64),
                    mae: Some(abs_err / *count as f64),
                    ..Default::default()
                }
            }
        }
    }
}

fn confusion_metrics(classes: usize, counts: &[u64]) -> MetricValues {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return MetricValues::default();
    }
    let correct: u64 = (0..classes).map(|c| counts[c * classes + c]).sum();

    let (mut p_sum, mut r_sum, mut f_sum, mut present) = (0.0, 0.0, 0.0, 0usize);
    for c in 0..classes {
        let tp       = counts[c * classes + c] as f64;
        let actual   = (0..classes).map(|p| counts[c * classes + p]).sum::<u64>() as f64;
        let predicted = (0..classes).map(|a| counts[a * classes + c]).sum::<u64>() as f64;
        if actual == 0.0 && predicted == 0.0 {
            continue;
        }

        let precision = if predicted > 0.0 { tp / predicted } else { 0.0 };
        let recall    = if actual    > 0.0 { tp / actual    } else { 0.0 };
        let f1        = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        p_sum   += precision;
        r_sum   += recall;
        f_sum   += f1;
        present += 1;
    }
    let present = present as f64;

    MetricValues {
        accuracy:  Some(correct as f64 / total as f64),
        precision: Some(p_sum / present),
        recall:    Some(r_sum / present),
        f1:        Some(f_sum / present),
        ..Default::default()
    }
}

fn to_vec<B: Backend>(tensor: Tensor<B, 4>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Cannot read tensor values: {e:?}"))
}

fn as_classes(values: &[f32]) -> Vec<usize> {
    values.iter().map(|v| v.round().max(0.0) as usize).collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    #[test]
    fn test_known_confusion_matrix() {
        // actual:    0 0 1 1 1 2
        // predicted: 0 1 1 1 0 2
        let mut m = MetricsAggregator::new(LossKind::Ce, 3);
        m.update_classes(&[0, 1, 1, 1, 0, 2], &[0, 0, 1, 1, 1, 2]);
        let v = m.compute();

        assert!((v.accuracy.unwrap() - 4.0 / 6.0).abs() < 1e-9);
        // precision: c0 1/2, c1 2/3, c2 1/1
        assert!((v.precision.unwrap() - (0.5 + 2.0 / 3.0 + 1.0) / 3.0).abs() < 1e-9);
        // recall: c0 1/2, c1 2/3, c2 1/1
        assert!((v.recall.unwrap() - (0.5 + 2.0 / 3.0 + 1.0) / 3.0).abs() < 1e-9);
        assert!(v.mse.is_none());
    }

    #[test]
    fn test_absent_classes_do_not_drag_the_average() {
        let mut m = MetricsAggregator::new(LossKind::Ce, 5);
        m.update_classes(&[0, 1], &[0, 1]);
        assert_eq!(m.compute().f1, Some(1.0));
    }

    #[test]
    fn test_regression_metrics() {
        let mut m = MetricsAggregator::new(LossKind::Mse, 1);
        m.update_regression(&[1.0, 2.0], &[0.0, 4.0]);
        let v = m.compute();
        assert_eq!(v.mse, Some(2.5));
        assert_eq!(v.mae, Some(1.5));
        assert!(v.accuracy.is_none());
    }

    #[test]
    fn test_ce_update_from_tensors() {
        let device  = Default::default();
        // Two pixels; class-1 logit wins on the first, class-0 on the second
        let outputs = Tensor::<NdArray, 4>::from_data(TensorData::new(vec![0.0f32, 3.0, 1.0, 0.0], [1, 2, 1, 2]), &device);
        let targets = Tensor::<NdArray, 4>::from_data(TensorData::new(vec![1.0f32, 1.0], [1, 1, 1, 2]), &device);

        let mut m = MetricsAggregator::new(LossKind::Ce, 2);
        m.update(outputs, targets).unwrap();
        assert_eq!(m.compute().accuracy, Some(0.5));

        m.reset();
        assert_eq!(m.compute(), MetricValues::default());
    }
}
