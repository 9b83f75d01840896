//! Model Module - BERT-style labeler
//!
//! - EncoderBlock: post-LN transformer block (attention + MLP)
//! - BertEncoder: embeddings followed by the encoder stack
//! - BertLabeler: encoder with a sequence or token classification head
//! - BertConfig: model configuration

pub mod bert;
pub mod block;
pub mod config;

pub use bert::{BertEncoder, BertLabeler, Mode};
pub use block::EncoderBlock;
pub use config::{BertConfig, HeadKind};
