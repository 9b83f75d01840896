//! BertEmbeddings - Word, position and segment embeddings

use candle_core::{Module, Result, Tensor};
use candle_nn::{Embedding, LayerNorm, VarBuilder};

use super::train_dropout;

pub struct BertEmbeddings {
    pub word_embeddings: Embedding,
    pub position_embeddings: Embedding,
    pub token_type_embeddings: Embedding,
    pub norm: LayerNorm,
    pub dropout: f32,
}

impl BertEmbeddings {
    pub fn load(
        vocab_size: usize,
        hidden_dim: usize,
        max_position_embeddings: usize,
        type_vocab_size: usize,
        layer_norm_eps: f64,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let word_embeddings =
            candle_nn::embedding(vocab_size, hidden_dim, vb.pp("word_embeddings"))?;
        let position_embeddings = candle_nn::embedding(
            max_position_embeddings,
            hidden_dim,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings =
            candle_nn::embedding(type_vocab_size, hidden_dim, vb.pp("token_type_embeddings"))?;
        let norm = candle_nn::layer_norm(hidden_dim, layer_norm_eps, vb.pp("norm"))?;
        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            norm,
            dropout,
        })
    }

    /// input_ids, token_type_ids: [batch, seq] (u32) -> [batch, seq, hidden]
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (_b_sz, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;

        let words = self.word_embeddings.forward(input_ids)?;
        let segments = self.token_type_embeddings.forward(token_type_ids)?;
        let positions = self
            .position_embeddings
            .forward(&positions)?
            .to_dtype(words.dtype())?;

        let x = (words + segments)?.broadcast_add(&positions)?;
        let x = self.norm.forward(&x)?;
        train_dropout(&x, self.dropout, train)
    }
}
