//! EncoderBlock - Post-LN transformer block (attention + MLP)

use candle_core::{Module, Result, Tensor};
use candle_nn::{LayerNorm, VarBuilder};

use crate::layers::{train_dropout, FeedForward, SelfAttention};

/// Single encoder block with residual connections, normalised after each sublayer
pub struct EncoderBlock {
    pub attention: SelfAttention,
    pub norm1: LayerNorm,
    pub mlp: FeedForward,
    pub norm2: LayerNorm,
    pub dropout: f32,
}

impl EncoderBlock {
    pub fn load(
        dim: usize,
        n_heads: usize,
        intermediate_dim: usize,
        layer_norm_eps: f64,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let attention = SelfAttention::load(dim, n_heads, dropout, vb.pp("attention"))?;
        let norm1 = candle_nn::layer_norm(dim, layer_norm_eps, vb.pp("norm1"))?;
        let mlp = FeedForward::load(dim, intermediate_dim, vb.pp("mlp"))?;
        let norm2 = candle_nn::layer_norm(dim, layer_norm_eps, vb.pp("norm2"))?;

        Ok(Self {
            attention,
            norm1,
            mlp,
            norm2,
            dropout,
        })
    }

    pub fn forward(&self, x: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let attn_out = self.attention.forward(x, attention_mask, train)?;
        let attn_out = train_dropout(&attn_out, self.dropout, train)?;
        let x_mid = self.norm1.forward(&(x + attn_out)?)?;

        let mlp_out = self.mlp.forward(&x_mid)?;
        let mlp_out = train_dropout(&mlp_out, self.dropout, train)?;
        self.norm2.forward(&(x_mid + mlp_out)?)
    }
}
