//! GradScaler - dynamic loss scaling for mixed precision

use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

const INIT_SCALE: f64 = 65536.0;
const GROWTH_FACTOR: f64 = 2.0;
const BACKOFF_FACTOR: f64 = 0.5;
const GROWTH_INTERVAL: usize = 2000;

/// Scales the loss before backward and unscales the gradients before the step.
/// Steps with non-finite gradients are skipped and the scale backs off.
/// A disabled scaler is the identity.
pub struct GradScaler {
    enabled: bool,
    scale: f64,
    growth_interval: usize,
    growth_tracker: usize,
}

impl GradScaler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            scale: INIT_SCALE,
            growth_interval: GROWTH_INTERVAL,
            growth_tracker: 0,
        }
    }

    pub fn with_growth_interval(mut self, interval: usize) -> Self {
        self.growth_interval = interval.max(1);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn scale(&self) -> f64 {
        if self.enabled {
            self.scale
        } else {
            1.0
        }
    }

    pub fn scale_loss(&self, loss: &Tensor) -> Result<Tensor> {
        if !self.enabled {
            return Ok(loss.clone());
        }
        Ok((loss * self.scale)?)
    }

    /// Divides the gradients by the scale in place.
    /// Returns true when any gradient is non-finite (the step must be skipped).
    pub fn unscale(&self, grads: &mut GradStore, vars: &[Var]) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        let inv_scale = 1.0 / self.scale;
        let mut found_inf = false;
        for var in vars {
            let unscaled = match grads.get(var.as_tensor()) {
                Some(grad) => (grad * inv_scale)?,
                None => continue,
            };
            let sq_sum = unscaled
                .sqr()?
                .sum_all()?
                .to_dtype(candle_core::DType::F64)?
                .to_scalar::<f64>()?;
            if !sq_sum.is_finite() {
                found_inf = true;
            }
            grads.insert(var.as_tensor(), unscaled);
        }
        Ok(found_inf)
    }

    /// Adjusts the scale after an update attempt.
    pub fn update(&mut self, found_inf: bool) {
        if !self.enabled {
            return;
        }
        if found_inf {
            self.scale *= BACKOFF_FACTOR;
            self.growth_tracker = 0;
            tracing::warn!(
                "Non-finite gradients, skipping step (loss scale -> {})",
                self.scale
            );
        } else {
            self.growth_tracker += 1;
            if self.growth_tracker == self.growth_interval {
                self.scale *= GROWTH_FACTOR;
                self.growth_tracker = 0;
            }
        }
    }
}
