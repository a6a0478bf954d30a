// ============================================================
// Layer 5 — Optimizers and Learning-Rate Schedules
// ============================================================
// Optimizers are Burn's; this module only maps the experiment's
// choices onto their configs:
//
//   adam     Adam, L2 weight decay when weight_decay > 0
//   adamw    AdamW, decoupled weight decay
//   sgd      SGD with momentum 0.9, L2 weight decay
//   rmsprop  RMSprop, L2 weight decay
//
// Schedules are stepped once per epoch after validation.
// t counts completed epochs:
//
//   none     lr0
//   cosine   eta_min + (lr0 - eta_min) * (1 + cos(pi * t / t_max)) / 2
//   step     lr0 * gamma ^ floor(t / step_size)
//   plateau  lr *= factor after more than `patience` epochs with
//            no relative improvement of 1e-4 in val_loss (mode min)
//
// Reference: Burn Book §5 (Optimizers)
//            Loshchilov & Hutter (2017) SGDR

use std::f64::consts::PI;

use burn::{
    module::AutodiffModule,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, AdamWConfig,
        Optimizer, RmsPropConfig, SgdConfig,
    },
    tensor::backend::AutodiffBackend,
};

use crate::application::config::SchedulerConfig;

pub const SGD_MOMENTUM: f64 = 0.9;
const PLATEAU_THRESHOLD: f64 = 1e-4;

// ─── Optimizer builders ───────────────────────────────────────────────────────

fn l2(weight_decay: f64) -> Option<WeightDecayConfig> {
    (weight_decay > 0.0).then(|| WeightDecayConfig::new(weight_decay as f32))
}

pub fn adam<B: AutodiffBackend, M: AutodiffModule<B>>(weight_decay: f64) -> impl Optimizer<M, B> {
    AdamConfig::new()
        .with_weight_decay(l2(weight_decay))
        .init::<B, M>()
}

pub fn adamw<B: AutodiffBackend, M: AutodiffModule<B>>(weight_decay: f64) -> impl Optimizer<M, B> {
    AdamWConfig::new()
        .with_weight_decay(weight_decay as f32)
        .init::<B, M>()
}

pub fn sgd<B: AutodiffBackend, M: AutodiffModule<B>>(weight_decay: f64) -> impl Optimizer<M, B> {
    SgdConfig::new()
        .with_weight_decay(l2(weight_decay))
        .with_momentum(Some(MomentumConfig::new().with_momentum(SGD_MOMENTUM)))
        .init::<B, M>()
}

pub fn rmsprop<B: AutodiffBackend, M: AutodiffModule<B>>(weight_decay: f64) -> impl Optimizer<M, B> {
    RmsPropConfig::new()
        .with_weight_decay(l2(weight_decay))
        .init::<B, M>()
}

// ─── LrScheduler ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct LrScheduler {
    base_lr:    f64,
    config:     SchedulerConfig,
    current:    f64,
    epoch:      usize,
    best:       Option<f64>,
    bad_epochs: usize,
}

impl LrScheduler {
    pub fn new(base_lr: f64, config: SchedulerConfig) -> Self {
        Self {
            base_lr,
            config,
            current:    base_lr,
            epoch:      0,
            best:       None,
            bad_epochs: 0,
        }
    }

    /// Learning rate for the next epoch
    pub fn lr(&self) -> f64 {
        self.current
    }

    /// Advance one epoch. `val_loss` drives the plateau schedule;
    /// the others ignore it.
    pub fn step(&mut self, val_loss: Option<f64>) {
        self.epoch += 1;
        let t = self.epoch as f64;

        self.current = match self.config {
            SchedulerConfig::Constant => self.base_lr,

            SchedulerConfig::Cosine { t_max, eta_min } => {
                let t_max = t_max.max(1) as f64;
                eta_min + (self.base_lr - eta_min) * (1.0 + (PI * t / t_max).cos()) / 2.0
            }

            SchedulerConfig::Step { step_size, gamma } => {
                let drops = self.epoch / step_size.max(1);
                self.base_lr * gamma.powi(drops as i32)
            }

            SchedulerConfig::Plateau { patience, factor } => {
                let mut lr = self.current;
                if let Some(loss) = val_loss.filter(|l| l.is_finite()) {
                    let improved = self.best.map_or(true, |best| loss < best * (1.0 - PLATEAU_THRESHOLD));
                    if improved {
                        self.best       = Some(loss);
                        self.bad_epochs = 0;
                    } else {
                        self.bad_epochs += 1;
                        if self.bad_epochs > patience {
                            lr *= factor;
                            self.bad_epochs = 0;
                            tracing::info!("Plateau: learning rate reduced to {:.3e}", lr);
                        }
                    }
                }
                lr
            }
        };
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_constant() {
        let mut s = LrScheduler::new(0.01, SchedulerConfig::Constant);
        s.step(Some(1.0));
        s.step(None);
        assert_eq!(s.lr(), 0.01);
    }

    #[test]
    fn test_cosine_reaches_eta_min_at_t_max() {
        let mut s = LrScheduler::new(1.0, SchedulerConfig::Cosine { t_max: 4, eta_min: 0.0 });
        s.step(None);
        assert!(close(s.lr(), (1.0 + (PI / 4.0).cos()) / 2.0));
        s.step(None);
        assert!(close(s.lr(), 0.5));
        s.step(None);
        s.step(None);
        assert!(close(s.lr(), 0.0));
    }

    #[test]
    fn test_step_decay() {
        let mut s = LrScheduler::new(1.0, SchedulerConfig::Step { step_size: 2, gamma: 0.1 });
        s.step(None);
        assert!(close(s.lr(), 1.0));
        s.step(None);
        assert!(close(s.lr(), 0.1));
        s.step(None);
        s.step(None);
        assert!(close(s.lr(), 0.01));
    }

    #[test]
    fn test_plateau_waits_for_patience() {
        let mut s = LrScheduler::new(1.0, SchedulerConfig::Plateau { patience: 2, factor: 0.5 });
        s.step(Some(1.0)); // best
        s.step(Some(1.0)); // bad 1
        s.step(Some(1.0)); // bad 2
        assert_eq!(s.lr(), 1.0);
        s.step(Some(1.0)); // bad 3 > patience
        assert_eq!(s.lr(), 0.5);
    }

    #[test]
    fn test_plateau_tiny_improvement_does_not_count() {
        let mut s = LrScheduler::new(1.0, SchedulerConfig::Plateau { patience: 0, factor: 0.1 });
        s.step(Some(1.0));
        s.step(Some(0.99999));
        assert!(close(s.lr(), 0.1));
    }
}
