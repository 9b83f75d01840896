//! Gradient clipping and accumulation over candle GradStores

use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::Var;

/// Global L2 norm of the gradients of `vars` (vars without a gradient are skipped).
pub fn grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f64> {
    let mut total_norm_sq = 0.0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let norm_sq = grad.sqr()?.sum_all()?.to_dtype(candle_core::DType::F64)?;
            total_norm_sq += norm_sq.to_scalar::<f64>()?;
        }
    }
    Ok(total_norm_sq.sqrt())
}

/// Clip gradients by global norm
///
/// If the global norm exceeds `max_norm`, every gradient is multiplied by
/// `max_norm / (norm + 1e-6)`. Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let total_norm = grad_norm(grads, vars)?;

    if total_norm > max_norm {
        let clip_coef = max_norm / (total_norm + 1e-6);
        for var in vars {
            let clipped = match grads.get(var.as_tensor()) {
                Some(grad) => (grad * clip_coef)?,
                None => continue,
            };
            grads.insert(var.as_tensor(), clipped);
        }
    }

    Ok(total_norm)
}

/// Adds the gradients in `new` into `acc`, variable by variable.
pub fn accumulate_grads(mut acc: GradStore, new: GradStore, vars: &[Var]) -> Result<GradStore> {
    for var in vars {
        let Some(grad) = new.get(var.as_tensor()) else {
            continue;
        };
        let sum = match acc.get(var.as_tensor()) {
            Some(prev) => (prev + grad)?,
            None => grad.clone(),
        };
        acc.insert(var.as_tensor(), sum);
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    /// loss = sum(a * x), so d(loss)/dx = a
    fn grads_for(var: &Var, a: &[f32]) -> Result<GradStore> {
        let coef = Tensor::new(a, &Device::Cpu)?;
        let loss = (var.as_tensor() * coef)?.sum_all()?;
        Ok(loss.backward()?)
    }

    #[test]
    fn test_clip_scales_to_max_norm() -> Result<()> {
        let var = Var::new(&[0.0f32, 0.0], &Device::Cpu)?;
        let mut grads = grads_for(&var, &[3.0, 4.0])?;

        let norm = clip_grad_norm(&mut grads, &[var.clone()], 1.0)?;
        assert!((norm - 5.0).abs() < 1e-6);

        let clipped = grad_norm(&grads, &[var])?;
        assert!((clipped - 1.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_clip_leaves_small_grads() -> Result<()> {
        let var = Var::new(&[0.0f32, 0.0], &Device::Cpu)?;
        let mut grads = grads_for(&var, &[0.3, 0.4])?;

        clip_grad_norm(&mut grads, &[var.clone()], 1.0)?;
        let grad = grads.get(var.as_tensor()).unwrap().to_vec1::<f32>()?;
        assert_eq!(grad, vec![0.3, 0.4]);
        Ok(())
    }

    #[test]
    fn test_accumulate_sums() -> Result<()> {
        let var = Var::new(&[0.0f32, 0.0], &Device::Cpu)?;
        let vars = [var.clone()];
        let acc = grads_for(&var, &[1.0, 2.0])?;
        let acc = accumulate_grads(acc, grads_for(&var, &[0.5, -1.0])?, &vars)?;

        let grad = acc.get(var.as_tensor()).unwrap().to_vec1::<f32>()?;
        assert_eq!(grad, vec![1.5, 1.0]);
        Ok(())
    }
}
