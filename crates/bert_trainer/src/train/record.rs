//! Epoch records - one row per epoch, written as a JSON array when training ends

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_ppl: f64,
    pub valid_loss: f64,
    pub valid_ppl: f64,
    pub learning_rate: f64,
    /// Wall time of the epoch as `Xm Ys`
    pub train_time: String,
}

pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// (mean loss, perplexity), both rounded to 3 decimals.
/// Perplexity is taken from the rounded loss.
pub fn loss_and_ppl(loss_sum: f64, n_batches: usize) -> (f64, f64) {
    let loss = round3(loss_sum / n_batches as f64);
    (loss, round3(loss.exp()))
}

pub fn save_records(path: &Path, records: &[EpochRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create record directory '{}'", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Cannot create record file '{}'", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), records)?;
    tracing::info!("Saved {} epoch records to '{}'", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ppl_matches_rounded_loss() {
        for (sum, n) in [(0.0, 1), (3.4567, 2), (12.0, 7), (0.0004, 1)] {
            let (loss, ppl) = loss_and_ppl(sum, n);
            assert_eq!(ppl, round3(loss.exp()));
            assert!(ppl >= 1.0);
        }
        assert_eq!(loss_and_ppl(3.4567, 2), (1.728, 5.629));
    }

    #[test]
    fn test_record_keys() -> Result<()> {
        let record = EpochRecord {
            epoch: 1,
            train_loss: 0.5,
            train_ppl: 1.649,
            valid_loss: 0.6,
            valid_ppl: 1.822,
            learning_rate: 1e-4,
            train_time: "0m 3s".into(),
        };
        let value = serde_json::to_value(&record)?;
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 7);
        Ok(())
    }
}
