use crate::config::InitArgs;
use crate::evaluate::EvaluateArgs;
use crate::train::TrainArgs;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "BERT fine-tuning toolchain", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model
    Train(TrainArgs),

    /// Evaluate a checkpoint (loss / perplexity)
    Evaluate(EvaluateArgs),

    /// Write a default project config
    Init(InitArgs),
}
