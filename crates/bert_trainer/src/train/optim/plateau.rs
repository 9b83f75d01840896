//! Reduce-on-plateau learning rate scheduler (min mode, relative threshold)

use candle_nn::Optimizer;

use crate::config::PlateauConfig;

pub struct ReduceLrOnPlateau {
    pub config: PlateauConfig,
    pub best: f64,
    num_bad_epochs: usize,
    cooldown_counter: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(config: PlateauConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            num_bad_epochs: 0,
            cooldown_counter: 0,
        }
    }

    fn is_better(&self, metric: f64) -> bool {
        metric < self.best * (1.0 - self.config.threshold)
    }

    /// Feeds one epoch's metric. Returns true when the learning rate should be reduced.
    pub fn step(&mut self, metric: f64) -> bool {
        if self.is_better(metric) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs > self.config.patience {
            self.cooldown_counter = self.config.cooldown;
            self.num_bad_epochs = 0;
            return true;
        }
        false
    }

    /// Applies the reduction factor to `optimizer`, floored at `min_lr`.
    /// Returns the new rate if it changed by more than `eps`.
    pub fn reduce<O: Optimizer>(&self, optimizer: &mut O) -> Option<f64> {
        let old_lr = optimizer.learning_rate();
        let new_lr = (old_lr * self.config.factor).max(self.config.min_lr);
        if old_lr - new_lr > self.config.eps {
            optimizer.set_learning_rate(new_lr);
            Some(new_lr)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};
    use candle_nn::{AdamW, ParamsAdamW};

    fn scheduler(patience: usize, cooldown: usize) -> ReduceLrOnPlateau {
        ReduceLrOnPlateau::new(PlateauConfig {
            patience,
            cooldown,
            ..Default::default()
        })
    }

    #[test]
    fn test_reduces_after_patience() {
        let mut s = scheduler(2, 0);
        assert!(!s.step(1.0));
        assert!(!s.step(1.0)); // bad 1
        assert!(!s.step(1.0)); // bad 2
        assert!(s.step(1.0)); // bad 3 > patience
        assert!(!s.step(0.5)); // improvement resets
        assert_eq!(s.best, 0.5);
    }

    #[test]
    fn test_threshold_is_relative() {
        let mut s = scheduler(0, 0);
        assert!(!s.step(1.0));
        // 0.99995 is within 1e-4 of the best, so it counts as a bad epoch
        assert!(s.step(0.99995));
    }

    #[test]
    fn test_cooldown_suppresses_bad_epochs() {
        let mut s = scheduler(0, 2);
        assert!(!s.step(1.0));
        assert!(s.step(2.0));
        assert!(!s.step(2.0)); // cooling down
        assert!(!s.step(2.0)); // cooling down
        assert!(s.step(2.0));
    }

    #[test]
    fn test_reduce_respects_min_lr() -> anyhow::Result<()> {
        let var = Var::new(&[1.0f32], &Device::Cpu)?;
        let mut opt = AdamW::new(
            vec![var],
            ParamsAdamW {
                lr: 1e-3,
                ..Default::default()
            },
        )?;
        let s = ReduceLrOnPlateau::new(PlateauConfig {
            min_lr: 5e-4,
            ..Default::default()
        });

        assert_eq!(s.reduce(&mut opt), Some(5e-4));
        assert_eq!(opt.learning_rate(), 5e-4);
        assert_eq!(s.reduce(&mut opt), None);
        Ok(())
    }
}
