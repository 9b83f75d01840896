//! Checkpoint Management - best-model weights plus a JSON state sidecar

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::model::TrainableModel;

/// Optimizer hyperparameters and progress at save time.
/// Moment estimates are not persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OptimizerState {
    pub learning_rate: f64,
    /// Second optimizer (backbone group) when the strategy is `fine`
    pub backbone_learning_rate: Option<f64>,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
    pub steps: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CheckpointState {
    pub epoch: usize,
    pub valid_loss: f64,
    /// File name of the weights this state belongs to
    pub checkpoint: String,
    pub optimizer: OptimizerState,
    pub date: String,
}

impl CheckpointState {
    pub fn new(epoch: usize, valid_loss: f64, weights: &Path, optimizer: OptimizerState) -> Self {
        let checkpoint = weights
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            epoch,
            valid_loss,
            checkpoint,
            optimizer,
            date: chrono::Local::now().to_rfc3339(),
        }
    }
}

/// `<dir>/<stem>.state.json` next to the weights file
pub fn state_path(weights: &Path) -> PathBuf {
    weights.with_extension("state.json")
}

/// Overwrites the weights at `path` and its state sidecar while holding an
/// exclusive lock on `<path>.lock`.
pub fn save_checkpoint<M: TrainableModel + ?Sized>(
    path: &Path,
    model: &M,
    state: &CheckpointState,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Cannot create checkpoint directory '{}'", parent.display())
        })?;
    }

    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    let lock_file = File::create(&lock_path)?;
    lock_file.lock_exclusive()?;

    model.save_weights(path)?;
    let file = File::create(state_path(path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), state)?;

    lock_file.unlock()?;
    tracing::debug!(
        "Checkpoint written to '{}' (epoch {})",
        path.display(),
        state.epoch
    );
    Ok(())
}

pub fn load_checkpoint_state(path: &Path) -> Result<CheckpointState> {
    let state_file = state_path(path);
    let file = File::open(&state_file)
        .with_context(|| format!("Cannot open checkpoint state '{}'", state_file.display()))?;
    let state = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid checkpoint state '{}'", state_file.display()))?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamGroups;
    use bert_engine::Mode;
    use candle_core::Tensor;

    struct NullModel;

    impl TrainableModel for NullModel {
        fn forward_loss(&self, input_ids: &Tensor, _: &Tensor, _: &Tensor) -> Result<Tensor> {
            Ok(input_ids.clone())
        }

        fn set_mode(&mut self, _mode: Mode) {}

        fn param_groups(&self) -> Result<ParamGroups> {
            Ok(ParamGroups::default())
        }

        fn save_weights(&self, path: &Path) -> Result<()> {
            std::fs::write(path, b"weights")?;
            Ok(())
        }
    }

    fn optimizer_state() -> OptimizerState {
        OptimizerState {
            learning_rate: 1e-3,
            backbone_learning_rate: Some(1e-4),
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
            steps: 12,
        }
    }

    #[test]
    fn test_state_path() {
        assert_eq!(
            state_path(Path::new("ckpt/bert.safetensors")),
            PathBuf::from("ckpt/bert.state.json")
        );
    }

    #[test]
    fn test_save_and_load_state() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("model.safetensors");

        let state = CheckpointState::new(3, 0.25, &path, optimizer_state());
        save_checkpoint(&path, &NullModel, &state)?;

        assert_eq!(std::fs::read(&path)?, b"weights");
        let loaded = load_checkpoint_state(&path)?;
        assert_eq!(loaded, state);
        assert_eq!(loaded.checkpoint, "model.safetensors");
        Ok(())
    }

    #[test]
    fn test_save_overwrites() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.safetensors");

        for (epoch, loss) in [(1, 0.5), (2, 0.4)] {
            let state = CheckpointState::new(epoch, loss, &path, optimizer_state());
            save_checkpoint(&path, &NullModel, &state)?;
        }

        assert_eq!(load_checkpoint_state(&path)?.epoch, 2);
        Ok(())
    }

    #[test]
    fn test_missing_state_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_checkpoint_state(&dir.path().join("none.safetensors")).is_err());
    }
}
