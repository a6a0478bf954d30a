// ============================================================
// Layer 5 — Loss Functions
// ============================================================
// Every loss takes model outputs [N, C, H, W] and targets and
// returns a scalar (shape [1]) averaged over all elements.
//
//   mse    mean((y - t)^2)                    targets [N, C, H, W]
//   bce    binary cross-entropy on logits     targets in {0, 1}, [N, C, H, W]
//   ce     cross-entropy over class channels  targets class ids, [N, 1, H, W]
//   huber  0.5 d^2           if |d| <= delta
//          delta (|d| - 0.5 delta)  otherwise, delta = 0.7
//
// For ce the logits are moved channel-last and flattened so
// each pixel is one row: [N*H*W, C].
//
// Reference: Burn Book §5 (Loss functions)

use burn::{
    nn::loss::{BinaryCrossEntropyLossConfig, CrossEntropyLossConfig, MseLoss, Reduction},
    prelude::*,
};

use crate::application::config::LossKind;

pub const HUBER_DELTA: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossFunction {
    Mse,
    Bce,
    Ce,
    Huber { delta: f64 },
}

impl From<LossKind> for LossFunction {
    fn from(kind: LossKind) -> Self {
        match kind {
            LossKind::Mse   => Self::Mse,
            LossKind::Bce   => Self::Bce,
            LossKind::Ce    => Self::Ce,
            LossKind::Huber => Self::Huber { delta: HUBER_DELTA },
        }
    }
}

impl LossFunction {
    pub fn forward<B: Backend>(&self, outputs: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        match *self {
            Self::Mse => MseLoss::new().forward(outputs, targets, Reduction::Mean),

            Self::Bce => {
                let [n, c, h, w] = outputs.dims();
                let loss = BinaryCrossEntropyLossConfig::new()
                    .with_logits(true)
                    .init(&outputs.device());
                loss.forward(
                    outputs.reshape([n, c * h * w]),
                    targets.reshape([n, c * h * w]).int(),
                )
            }

            Self::Ce => {
                let [n, c, h, w] = outputs.dims();
                let logits = outputs.permute([0, 2, 3, 1]).reshape([n * h * w, c]);
                let labels = targets.reshape([n * h * w]).int();
                CrossEntropyLossConfig::new()
                    .init(&logits.device())
                    .forward(logits, labels)
            }

            Self::Huber { delta } => {
                let diff      = (outputs - targets).abs();
                let quadratic = diff.clone().clamp_max(delta);
                let linear    = diff - quadratic.clone();
                (quadratic.powf_scalar(2.0) * 0.5 + linear * delta).mean()
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    type B = NdArray;

    fn t(values: Vec<f32>, shape: [usize; 4]) -> Tensor<B, 4> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn scalar(x: Tensor<B, 1>) -> f32 {
        x.into_scalar()
    }

    #[test]
    fn test_mse() {
        let loss = LossFunction::Mse.forward(t(vec![1.0, 3.0], [1, 1, 1, 2]), t(vec![0.0, 0.0], [1, 1, 1, 2]));
        assert!((scalar(loss) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_huber_switches_to_linear() {
        // |d| = 0.2 → 0.5 * 0.04 = 0.02
        // |d| = 2.0 → 0.7 * (2.0 - 0.35) = 1.155
        let loss = LossFunction::from(LossKind::Huber)
            .forward(t(vec![0.2, 2.0], [1, 1, 1, 2]), t(vec![0.0, 0.0], [1, 1, 1, 2]));
        assert!((scalar(loss) - (0.02 + 1.155) / 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_cross_entropy_prefers_correct_class() {
        let targets = t(vec![1.0, 0.0], [1, 1, 1, 2]);
        // Channel-major logits: class 0 plane then class 1 plane
        let right = t(vec![-5.0, 5.0, 5.0, -5.0], [1, 2, 1, 2]);
        let wrong = t(vec![5.0, -5.0, -5.0, 5.0], [1, 2, 1, 2]);

        let good = scalar(LossFunction::Ce.forward(right, targets.clone()));
        let bad  = scalar(LossFunction::Ce.forward(wrong, targets));
        assert!(good < 0.01);
        assert!(bad > 5.0);
    }

    #[test]
    fn test_bce_on_logits() {
        let targets = t(vec![1.0, 0.0], [1, 1, 1, 2]);
        let good = scalar(LossFunction::Bce.forward(t(vec![8.0, -8.0], [1, 1, 1, 2]), targets.clone()));
        let bad  = scalar(LossFunction::Bce.forward(t(vec![-8.0, 8.0], [1, 1, 1, 2]), targets));
        assert!(good < bad);
        assert!(good < 0.01);
    }
}
