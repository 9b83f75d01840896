//! Training Arguments - CLI overrides on top of the project config

use clap::Args;
use std::path::PathBuf;

use crate::config::ProjectConfig;

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Project config (JSON)
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Training data (JSONL), overrides data.train_path
    #[arg(long)]
    pub train: Option<PathBuf>,

    /// Validation data (JSONL), overrides data.valid_path
    #[arg(long)]
    pub valid: Option<PathBuf>,

    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub lr: Option<f64>,

    #[arg(long)]
    pub device: Option<String>,

    #[arg(long)]
    pub model_name: Option<String>,
}

impl TrainArgs {
    pub fn apply_overrides(&self, project: &mut ProjectConfig) {
        if let Some(ref path) = self.train {
            project.data.train_path = Some(path.clone());
        }
        if let Some(ref path) = self.valid {
            project.data.valid_path = Some(path.clone());
        }
        if let Some(epochs) = self.epochs {
            project.train.n_epochs = epochs;
        }
        if let Some(lr) = self.lr {
            project.train.learning_rate = lr;
        }
        if let Some(ref device) = self.device {
            project.train.device = device.clone();
        }
        if let Some(ref name) = self.model_name {
            project.train.model_name = name.clone();
        }
    }
}
