//! BERT Trainer
//!
//! Supervised training harness for BERT-style classifiers and token labelers:
//! epoch loop, gradient accumulation and clipping, AdamW stepping,
//! reduce-on-plateau scheduling, best-model checkpointing and epoch records.

pub mod cli;
pub mod config;
pub mod data;
pub mod evaluate;
pub mod model;
pub mod train;

pub use bert_engine::Mode;
