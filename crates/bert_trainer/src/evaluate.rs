//! Evaluation - loss and perplexity of a saved checkpoint on a JSONL file

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

use bert_engine::device_utils::parse_device;
use bert_engine::{BertLabeler, Mode};

use crate::config::ProjectConfig;
use crate::data::{BatchedDataset, DataSource};
use crate::train::{evaluate_loss, load_checkpoint_state};

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    /// Project config (JSON) the checkpoint was trained with
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Evaluation data (JSONL)
    #[arg(short, long, required = true)]
    pub data: PathBuf,

    /// Weights file, defaults to the config's checkpoint path
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    info!("--- BERT Evaluation (Perplexity) ---");
    let project = ProjectConfig::load(&args.config)?;
    project.validate()?;

    let checkpoint = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| project.train.checkpoint_path());
    info!("Checkpoint: {}", checkpoint.display());
    info!("Data:       {}", args.data.display());

    let device = parse_device(&project.train.device)?;
    let bert_config = project.to_bert_config();
    let mut model = BertLabeler::new(bert_config, &device)?;
    model
        .load_weights(&checkpoint)
        .with_context(|| format!("Cannot load weights from '{}'", checkpoint.display()))?;
    model.set_mode(Mode::Eval);
    info!("Model loaded successfully on {:?}", device);

    match load_checkpoint_state(&checkpoint) {
        Ok(state) => info!(
            "Checkpoint from epoch {} (valid loss {:.3}, saved {})",
            state.epoch, state.valid_loss, state.date
        ),
        Err(e) => warn!("No checkpoint state found: {:#}", e),
    }

    let data = BatchedDataset::from_jsonl(&args.data, &project.data, bert_config.head, None)?;
    let (loss, ppl) = evaluate_loss(&model, &data, &device)?;

    println!("Batches:    {}", data.len());
    println!("Loss:       {:.3}", loss);
    println!("Perplexity: {:.2}", ppl);
    info!("Evaluation done: loss={:.3}, ppl={:.2}", loss, ppl);
    Ok(())
}
