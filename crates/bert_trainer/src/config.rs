//! Project Configuration
//!
//! Loads the JSON project file (`train`, `model`, `data` sections), validates
//! it and converts the model section into a `BertConfig`.

use anyhow::{ensure, Context, Result};
use bert_engine::{BertConfig, HeadKind};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the parameter groups are optimized
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Head at `learning_rate`, backbone at a tenth of it (second optimizer)
    #[default]
    Fine,
    /// Single optimizer over every parameter
    Full,
    /// Backbone frozen, only the head is trained
    Frozen,
}

/// Reduce-on-plateau settings (min mode, relative threshold)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub threshold: f64,
    pub cooldown: usize,
    pub min_lr: f64,
    pub eps: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.1,
            patience: 10,
            threshold: 1e-4,
            cooldown: 0,
            min_lr: 0.0,
            eps: 1e-8,
        }
    }
}

/// Training configuration record, read once by the trainer
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TrainConfig {
    /// Names the record file `<record_dir>/<model_name>.json`. Required.
    pub model_name: String,
    pub clip: f64,
    pub device: String,
    pub strategy: Strategy,
    pub n_epochs: usize,
    pub vocab_size: usize,
    pub iters_to_accumulate: usize,
    pub early_stop: bool,
    pub patience: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub mixed_precision: bool,
    pub ckpt_path: Option<PathBuf>,
    pub record_dir: PathBuf,
    pub scheduler: PlateauConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            clip: 1.0,
            device: "auto".to_string(),
            strategy: Strategy::Fine,
            n_epochs: 10,
            vocab_size: 30522,
            iters_to_accumulate: 1,
            early_stop: false,
            patience: 3,
            learning_rate: 5e-5,
            weight_decay: 0.01,
            mixed_precision: false,
            ckpt_path: None,
            record_dir: PathBuf::from("ckpt"),
            scheduler: PlateauConfig::default(),
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.model_name.trim().is_empty(),
            "train.model_name is required (it names the record file)"
        );
        ensure!(self.clip > 0.0, "train.clip must be positive, got {}", self.clip);
        ensure!(self.n_epochs >= 1, "train.n_epochs must be at least 1");
        ensure!(self.vocab_size >= 1, "train.vocab_size must be at least 1");
        ensure!(
            self.iters_to_accumulate >= 1,
            "train.iters_to_accumulate must be at least 1"
        );
        ensure!(
            self.learning_rate > 0.0,
            "train.learning_rate must be positive, got {}",
            self.learning_rate
        );
        ensure!(
            !self.early_stop || self.patience >= 1,
            "train.patience must be at least 1 when early_stop is enabled"
        );
        ensure!(
            self.scheduler.factor > 0.0 && self.scheduler.factor < 1.0,
            "train.scheduler.factor must be in (0, 1), got {}",
            self.scheduler.factor
        );
        Ok(())
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        match &self.ckpt_path {
            Some(path) => path.clone(),
            None => self
                .record_dir
                .join(format!("{}.safetensors", self.model_name)),
        }
    }

    pub fn record_path(&self) -> PathBuf {
        self.record_dir.join(format!("{}.json", self.model_name))
    }
}

/// Model architecture section (vocab size comes from `train`)
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ModelSection {
    pub hidden_dim: usize,
    #[serde(alias = "layers")]
    pub num_layers: usize,
    #[serde(alias = "n_heads")]
    pub num_heads: usize,
    pub intermediate_dim: usize,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub num_labels: usize,
    pub dropout: f32,
    pub layer_norm_eps: f64,
    pub head: HeadKind,
}

impl Default for ModelSection {
    fn default() -> Self {
        let base = BertConfig::default();
        Self {
            hidden_dim: base.hidden_dim,
            num_layers: base.num_layers,
            num_heads: base.num_heads,
            intermediate_dim: base.intermediate_dim,
            max_position_embeddings: base.max_position_embeddings,
            type_vocab_size: base.type_vocab_size,
            num_labels: base.num_labels,
            dropout: base.dropout,
            layer_norm_eps: base.layer_norm_eps,
            head: base.head,
        }
    }
}

/// Dataset section
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DataConfig {
    pub train_path: Option<PathBuf>,
    pub valid_path: Option<PathBuf>,
    pub batch_size: usize,
    pub max_len: usize,
    pub pad_id: u32,
    /// Shuffles the training examples once at load time
    pub shuffle_seed: Option<u64>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_path: None,
            valid_path: None,
            batch_size: 16,
            max_len: 128,
            pad_id: 0,
            shuffle_seed: Some(42),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ProjectConfig {
    pub train: TrainConfig,
    pub model: ModelSection,
    pub data: DataConfig,
}

impl ProjectConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Invalid config JSON in '{}'", path.display()))?;
        tracing::debug!("Loaded project config from '{}'", path.display());
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.train.validate()?;
        self.to_bert_config().validate()?;
        ensure!(self.data.batch_size >= 1, "data.batch_size must be at least 1");
        ensure!(self.data.max_len >= 1, "data.max_len must be at least 1");
        ensure!(
            self.data.max_len <= self.model.max_position_embeddings,
            "data.max_len ({}) exceeds model.max_position_embeddings ({})",
            self.data.max_len,
            self.model.max_position_embeddings
        );
        Ok(())
    }

    pub fn to_bert_config(&self) -> BertConfig {
        BertConfig {
            vocab_size: self.train.vocab_size,
            hidden_dim: self.model.hidden_dim,
            num_layers: self.model.num_layers,
            num_heads: self.model.num_heads,
            intermediate_dim: self.model.intermediate_dim,
            max_position_embeddings: self.model.max_position_embeddings,
            type_vocab_size: self.model.type_vocab_size,
            num_labels: self.model.num_labels,
            dropout: self.model.dropout,
            layer_norm_eps: self.model.layer_norm_eps,
            pad_token_id: self.data.pad_id,
            head: self.model.head,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Where to write the project config
    #[arg(long, default_value = "config.json")]
    pub output: PathBuf,

    #[arg(long, required = true)]
    pub model_name: String,

    /// Overwrite an existing file
    #[arg(long, action)]
    pub force: bool,
}

/// Writes a default project config with the given model name.
pub fn run_init(args: InitArgs) -> Result<()> {
    ensure!(
        args.force || !args.output.exists(),
        "'{}' already exists (use --force to overwrite)",
        args.output.display()
    );
    let mut config = ProjectConfig::default();
    config.train.model_name = args.model_name;
    config.validate()?;
    config.save(&args.output)?;
    tracing::info!("Wrote project config to '{}'", args.output.display());
    Ok(())
}
