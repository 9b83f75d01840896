//! FeedForward - GELU MLP (up, down projections)

use candle_core::{Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

pub struct FeedForward {
    pub up: Linear,
    pub down: Linear,
}

impl FeedForward {
    pub fn load(hidden_dim: usize, intermediate_dim: usize, vb: VarBuilder) -> Result<Self> {
        let up = candle_nn::linear(hidden_dim, intermediate_dim, vb.pp("up_proj"))?;
        let down = candle_nn::linear(intermediate_dim, hidden_dim, vb.pp("down_proj"))?;
        Ok(Self { up, down })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = self.up.forward(x)?.gelu_erf()?;
        self.down.forward(&hidden)
    }
}
