#[cfg(test)]
mod tests {
    use crate::layers::attention::{padding_mask, SelfAttention};
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn test_padding_mask() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let ids = Tensor::new(&[[5u32, 7, 0, 0], [3, 0, 0, 0]], &device)?;

        let mask = padding_mask(&ids, 0, &device)?;

        assert_eq!(mask.to_vec2::<u8>()?, vec![vec![1, 1, 0, 0], vec![1, 0, 0, 0]]);
        Ok(())
    }

    #[test]
    fn test_padded_keys_do_not_leak() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attn = SelfAttention::load(16, 4, 0.0, vb)?;

        let x = Tensor::randn(0.0f32, 1.0, (1, 4, 16), &device)?;
        let mask = Tensor::new(&[[1u8, 1, 0, 0]], &device)?;

        // Perturb only the padded positions
        let noise = Tensor::randn(0.0f32, 5.0, (1, 2, 16), &device)?;
        let x_perturbed = Tensor::cat(&[&x.narrow(1, 0, 2)?, &noise], 1)?;

        let y = attn.forward(&x, &mask, false)?;
        let y_perturbed = attn.forward(&x_perturbed, &mask, false)?;

        // Outputs at real positions only attend to real keys
        let diff = (y.i((.., 0..2, ..))? - y_perturbed.i((.., 0..2, ..))?)?
            .abs()?
            .max_all()?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-5, "padded keys changed real outputs by {}", diff);

        assert_eq!(y.dims(), &[1, 4, 16]);
        Ok(())
    }
}
