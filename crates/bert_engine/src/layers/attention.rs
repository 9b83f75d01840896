use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{ops::softmax, Linear, VarBuilder};

use super::train_dropout;

/// Large negative bias for masked keys. Finite so fully padded rows stay NaN-free.
const MASK_BIAS: f64 = 1e9;

/// Bidirectional multi-head self-attention
#[derive(Clone)]
pub struct SelfAttention {
    pub q_proj: Linear,
    pub k_proj: Linear,
    pub v_proj: Linear,
    pub o_proj: Linear,
    pub n_heads: usize,
    pub head_dim: usize,
    pub scaling: f64,
    pub dropout: f32,
}

impl SelfAttention {
    pub fn load(hidden_dim: usize, n_heads: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let head_dim = hidden_dim / n_heads;
        let scaling = 1.0 / (head_dim as f64).sqrt();

        let q_proj = candle_nn::linear(hidden_dim, n_heads * head_dim, vb.pp("q_proj"))?;
        let k_proj = candle_nn::linear(hidden_dim, n_heads * head_dim, vb.pp("k_proj"))?;
        let v_proj = candle_nn::linear(hidden_dim, n_heads * head_dim, vb.pp("v_proj"))?;
        let o_proj = candle_nn::linear(n_heads * head_dim, hidden_dim, vb.pp("o_proj"))?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            n_heads,
            head_dim,
            scaling,
            dropout,
        })
    }

    /// x: [batch, seq, hidden], attention_mask: [batch, seq] with 1 for real tokens, 0 for padding.
    pub fn forward(&self, x: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let (b_sz, seq_len, hidden) = x.dims3()?;

        // Shape: [Batch, Seq, Heads * Dim] -> [Batch, Seq, Heads, Dim] -> [Batch, Heads, Seq, Dim]
        let q = self
            .q_proj
            .forward(x)?
            .reshape((b_sz, seq_len, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((b_sz, seq_len, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((b_sz, seq_len, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        // Attn = Softmax(Q @ K.T / sqrt(dim) + mask)
        let att = (q.matmul(&k.t()?)? * self.scaling)?;
        let att = self.apply_padding_mask(&att, attention_mask)?;
        let att = softmax(&att, candle_core::D::Minus1)?;
        let att = train_dropout(&att, self.dropout, train)?;

        let y = att.matmul(&v)?;

        // Reassemble: [Batch, Heads, Seq, Dim] -> [Batch, Seq, Heads, Dim] -> [Batch, Seq, Hidden]
        let y = y.transpose(1, 2)?.reshape((b_sz, seq_len, hidden))?;
        self.o_proj.forward(&y)
    }

    fn apply_padding_mask(&self, att: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let (b_sz, k_len) = attention_mask.dims2()?;

        // 0 for real keys, -MASK_BIAS for padded keys, broadcast over heads and queries
        let bias = attention_mask
            .to_dtype(att.dtype())?
            .affine(MASK_BIAS, -MASK_BIAS)?
            .reshape((b_sz, 1, 1, k_len))?;

        let bias = if bias.device().same_device(att.device()) {
            bias
        } else {
            bias.to_device(att.device())?
        };

        att.broadcast_add(&bias)
    }
}

/// Builds the [batch, seq] padding mask (1 = token, 0 = pad) from token ids.
pub fn padding_mask(input_ids: &Tensor, pad_token_id: u32, device: &Device) -> Result<Tensor> {
    let pad = Tensor::full(pad_token_id, input_ids.dims(), device)?;
    input_ids.ne(&pad)
}
