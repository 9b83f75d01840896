//! TrainableModel - the seam between the trainer and a model

use anyhow::Result;
use bert_engine::{BertLabeler, Mode};
use candle_core::{Tensor, Var};
use std::path::Path;

/// Parameters split by role: the pretrained backbone and the task head.
#[derive(Default)]
pub struct ParamGroups {
    pub backbone: Vec<Var>,
    pub head: Vec<Var>,
}

/// What the trainer needs from a model.
pub trait TrainableModel {
    /// Scalar loss for one batch. Gradients are only taken in training mode.
    fn forward_loss(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        labels: &Tensor,
    ) -> Result<Tensor>;

    fn set_mode(&mut self, mode: Mode);

    fn param_groups(&self) -> Result<ParamGroups>;

    fn save_weights(&self, path: &Path) -> Result<()>;
}

impl TrainableModel for BertLabeler {
    fn forward_loss(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        labels: &Tensor,
    ) -> Result<Tensor> {
        Ok(BertLabeler::forward_loss(self, input_ids, token_type_ids, labels)?)
    }

    fn set_mode(&mut self, mode: Mode) {
        BertLabeler::set_mode(self, mode)
    }

    fn param_groups(&self) -> Result<ParamGroups> {
        let (backbone, head) = self.split_vars()?;
        Ok(ParamGroups { backbone, head })
    }

    fn save_weights(&self, path: &Path) -> Result<()> {
        Ok(self.save(path)?)
    }
}
