//! BERT Engine
//!
//! Small BERT-style encoder with a sequence or token classification head,
//! built on candle. The training harness in `bert_trainer` drives it through
//! `forward_loss` and the `Mode` flag.

pub mod device_utils;
pub mod layers;
pub mod model;

pub use model::{BertConfig, BertEncoder, BertLabeler, EncoderBlock, HeadKind, Mode};

#[cfg(test)]
mod tests;
