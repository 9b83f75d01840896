//! BertEncoder and BertLabeler - Full model implementation

use candle_core::{DType, Device, IndexOp, Module, Result, Tensor, Var, D};
use candle_nn::{ops, Linear, VarBuilder, VarMap};
use std::path::Path;

use crate::layers::attention::padding_mask;
use crate::layers::{train_dropout, BertEmbeddings};
use crate::model::{BertConfig, EncoderBlock, HeadKind};

/// Variable prefix of the pretrained backbone (embeddings, encoder stack, pooler)
pub const BACKBONE_PREFIX: &str = "encoder.";

/// Training-only behaviour (dropout) is enabled in `Train` and disabled in `Eval`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        self == Mode::Train
    }
}

/// Embeddings followed by the encoder stack
pub struct BertEncoder {
    pub embeddings: BertEmbeddings,
    pub layers: Vec<EncoderBlock>,
}

impl BertEncoder {
    pub fn load(cfg: &BertConfig, vb: VarBuilder) -> Result<Self> {
        let embeddings = BertEmbeddings::load(
            cfg.vocab_size,
            cfg.hidden_dim,
            cfg.max_position_embeddings,
            cfg.type_vocab_size,
            cfg.layer_norm_eps,
            cfg.dropout,
            vb.pp("embeddings"),
        )?;

        let mut layers = Vec::with_capacity(cfg.num_layers);
        for i in 0..cfg.num_layers {
            layers.push(EncoderBlock::load(
                cfg.hidden_dim,
                cfg.num_heads,
                cfg.intermediate_dim,
                cfg.layer_norm_eps,
                cfg.dropout,
                vb.pp(format!("layers.{}", i)),
            )?);
        }

        Ok(Self { embeddings, layers })
    }

    /// Returns hidden states [batch, seq, hidden]
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let mut h = self.embeddings.forward(input_ids, token_type_ids, train)?;
        for layer in self.layers.iter() {
            h = layer.forward(&h, attention_mask, train)?;
        }
        Ok(h)
    }
}

/// BERT-style classifier / token labeler owning its parameters
pub struct BertLabeler {
    pub encoder: BertEncoder,
    /// Dense + tanh over the first token (sequence head only)
    pub pooler: Option<Linear>,
    pub classifier: Linear,
    pub config: BertConfig,
    pub device: Device,
    varmap: VarMap,
    mode: Mode,
}

impl BertLabeler {
    /// Builds a freshly initialised model on `device`.
    pub fn new(config: BertConfig, device: &Device) -> Result<Self> {
        config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let encoder = BertEncoder::load(&config, vb.pp("encoder"))?;
        let pooler = match config.head {
            HeadKind::Sequence => Some(candle_nn::linear(
                config.hidden_dim,
                config.hidden_dim,
                vb.pp("encoder").pp("pooler"),
            )?),
            HeadKind::Token => None,
        };
        let classifier =
            candle_nn::linear(config.hidden_dim, config.num_labels, vb.pp("classifier"))?;

        tracing::debug!(
            "BertLabeler: {} layers, hidden={}, heads={}, labels={}, head={:?} (~{:.2}M params)",
            config.num_layers,
            config.hidden_dim,
            config.num_heads,
            config.num_labels,
            config.head,
            config.estimate_params() as f64 / 1_000_000.0
        );

        Ok(Self {
            encoder,
            pooler,
            classifier,
            config,
            device: device.clone(),
            varmap,
            mode: Mode::Train,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Logits: [batch, num_labels] for the sequence head,
    /// [batch, seq, num_labels] for the token head.
    pub fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor) -> Result<Tensor> {
        let mask = padding_mask(input_ids, self.config.pad_token_id, input_ids.device())?;
        self.forward_masked(input_ids, token_type_ids, &mask)
    }

    fn forward_masked(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<Tensor> {
        let train = self.mode.is_train();
        let hidden = self
            .encoder
            .forward(input_ids, token_type_ids, attention_mask, train)?;

        match &self.pooler {
            Some(pooler) => {
                let first = hidden.i((.., 0, ..))?.contiguous()?;
                let pooled = pooler.forward(&first)?.tanh()?;
                let pooled = train_dropout(&pooled, self.config.dropout, train)?;
                self.classifier.forward(&pooled)
            }
            None => {
                let hidden = train_dropout(&hidden, self.config.dropout, train)?;
                self.classifier.forward(&hidden)
            }
        }
    }

    /// Mean cross-entropy loss as a scalar tensor.
    pub fn forward_loss(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        labels: &Tensor,
    ) -> Result<Tensor> {
        let mask = padding_mask(input_ids, self.config.pad_token_id, input_ids.device())?;
        let logits = self.forward_masked(input_ids, token_type_ids, &mask)?;

        match self.config.head {
            HeadKind::Sequence => {
                let labels = labels.flatten_all()?;
                candle_nn::loss::cross_entropy(&logits, &labels)
            }
            HeadKind::Token => masked_token_loss(&logits, labels, &mask),
        }
    }

    /// All parameters sorted by name.
    pub fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("VarMap lock poisoned: {}", e)))?;
        let mut vars: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    /// Splits the parameters into (backbone, head).
    pub fn split_vars(&self) -> Result<(Vec<Var>, Vec<Var>)> {
        let (backbone, head): (Vec<_>, Vec<_>) = self
            .named_vars()?
            .into_iter()
            .partition(|(name, _)| name.starts_with(BACKBONE_PREFIX));
        Ok((
            backbone.into_iter().map(|(_, v)| v).collect(),
            head.into_iter().map(|(_, v)| v).collect(),
        ))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.varmap.save(path)
    }

    pub fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.varmap.load(path)
    }
}

/// Token-level cross-entropy averaged over non-pad positions.
fn masked_token_loss(logits: &Tensor, labels: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let (b_sz, seq_len, n_labels) = logits.dims3()?;
    let logits_flat = logits.reshape((b_sz * seq_len, n_labels))?;
    let labels_flat = labels.reshape(b_sz * seq_len)?;

    let log_sm = ops::log_softmax(&logits_flat, D::Minus1)?;
    let loss_vec = log_sm
        .gather(&labels_flat.unsqueeze(1)?, D::Minus1)?
        .squeeze(D::Minus1)?
        .neg()?;

    let m_flat = mask.reshape(b_sz * seq_len)?.to_dtype(loss_vec.dtype())?;
    let sum_mask = m_flat.sum_all()?.to_scalar::<f32>()?;
    let masked_loss = (loss_vec * m_flat)?.sum_all()?;
    if sum_mask == 0.0 {
        return masked_loss.affine(0.0, 0.0);
    }
    masked_loss / sum_mask as f64
}
