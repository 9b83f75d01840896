//! BertConfig - Model configuration

use serde::{Deserialize, Serialize};

/// Which classification head sits on top of the encoder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadKind {
    /// One label per sequence, read from the pooled first token
    Sequence,
    /// One label per token; pad positions are excluded from the loss
    Token,
}

/// Model configuration for BertLabeler
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct BertConfig {
    pub vocab_size: usize,
    pub hidden_dim: usize,
    #[serde(alias = "n_layers")]
    pub num_layers: usize,
    #[serde(alias = "n_heads")]
    pub num_heads: usize,
    pub intermediate_dim: usize,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub num_labels: usize,
    pub dropout: f32,
    pub layer_norm_eps: f64,
    pub pad_token_id: u32,
    pub head: HeadKind,
}

impl Default for BertConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            hidden_dim: 256,
            num_layers: 4,
            num_heads: 4,
            intermediate_dim: 1024,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            num_labels: 2,
            dropout: 0.1,
            layer_norm_eps: 1e-12,
            pad_token_id: 0,
            head: HeadKind::Sequence,
        }
    }
}

impl BertConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.num_heads
    }

    pub fn validate(&self) -> candle_core::Result<()> {
        if self.vocab_size == 0 || self.hidden_dim == 0 || self.num_heads == 0 {
            candle_core::bail!("vocab_size, hidden_dim and num_heads must be non-zero");
        }
        if self.hidden_dim % self.num_heads != 0 {
            candle_core::bail!(
                "hidden_dim {} is not divisible by num_heads {}",
                self.hidden_dim,
                self.num_heads
            );
        }
        if self.num_labels < 2 {
            candle_core::bail!("num_labels must be at least 2, got {}", self.num_labels);
        }
        if self.type_vocab_size == 0 || self.max_position_embeddings == 0 {
            candle_core::bail!("type_vocab_size and max_position_embeddings must be non-zero");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            candle_core::bail!("dropout must be in [0, 1), got {}", self.dropout);
        }
        Ok(())
    }

    /// Rough parameter count (embeddings + encoder + head)
    pub fn estimate_params(&self) -> usize {
        let h = self.hidden_dim;
        let embeddings =
            (self.vocab_size + self.max_position_embeddings + self.type_vocab_size) * h;
        let attention = 4 * (h * h + h);
        let mlp = 2 * h * self.intermediate_dim + self.intermediate_dim + h;
        let norms = 4 * h;
        let head = h * self.num_labels + self.num_labels
            + if self.head == HeadKind::Sequence { h * h + h } else { 0 };
        embeddings + 2 * h + self.num_layers * (attention + mlp + norms) + head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_uneven_heads() {
        let cfg = BertConfig {
            hidden_dim: 30,
            num_heads: 4,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        assert!(BertConfig::default().validate().is_ok());
    }

    #[test]
    fn test_head_kind_serde() -> anyhow::Result<()> {
        let cfg: BertConfig = serde_json::from_str(
            r#"{"vocab_size":100,"hidden_dim":32,"n_layers":2,"n_heads":4,
                "intermediate_dim":64,"max_position_embeddings":16,"type_vocab_size":2,
                "num_labels":3,"dropout":0.0,"layer_norm_eps":1e-12,"pad_token_id":0,
                "head":"token"}"#,
        )?;
        assert_eq!(cfg.head, HeadKind::Token);
        assert_eq!(cfg.num_layers, 2);
        assert_eq!(cfg.head_dim(), 8);
        Ok(())
    }
}
