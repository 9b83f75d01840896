//! Layers Module - Encoder building blocks
//!
//! - BertEmbeddings: word + position + segment embeddings with LayerNorm
//! - SelfAttention: bidirectional multi-head attention with a padding mask
//! - FeedForward: GELU MLP

use candle_core::{Result, Tensor};

pub mod attention;
pub mod embeddings;
pub mod feed_forward;

pub use attention::SelfAttention;
pub use embeddings::BertEmbeddings;
pub use feed_forward::FeedForward;

/// Dropout that is only active while training.
pub(crate) fn train_dropout(x: &Tensor, p: f32, train: bool) -> Result<Tensor> {
    if train && p > 0.0 {
        candle_nn::ops::dropout(x, p)
    } else {
        Ok(x.clone())
    }
}
