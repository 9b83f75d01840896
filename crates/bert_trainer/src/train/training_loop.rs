//! Training Loop - wires config, data, model and the Trainer together

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use bert_engine::device_utils::parse_device;
use bert_engine::BertLabeler;

use super::args::TrainArgs;
use super::trainer::{StopReason, Trainer};
use crate::config::ProjectConfig;
use crate::data::BatchedDataset;

/// First Ctrl+C requests a stop at the next epoch boundary, the second exits.
fn install_stop_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    let ctrl_c_count = Arc::new(AtomicUsize::new(0));
    let c = ctrl_c_count.clone();

    ctrlc::set_handler(move || {
        let count = c.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            info!("Ctrl+C detected! Finishing the current epoch and writing records...");
            info!("(Press Ctrl+C again to force quit)");
            s.store(true, Ordering::SeqCst);
        } else {
            error!("Force quit! Exiting immediately.");
            std::process::exit(1);
        }
    })
    .context("Error setting Ctrl-C handler")?;

    Ok(stop)
}

pub fn run(args: TrainArgs) -> Result<()> {
    info!("--- BERT Trainer ---");
    let mut project = ProjectConfig::load(&args.config)?;
    args.apply_overrides(&mut project);
    project.validate()?;

    let bert_config = project.to_bert_config();
    info!(
        "Model: hidden={}, layers={}, heads={}, head={:?}, labels={} (~{:.2}M params)",
        bert_config.hidden_dim,
        bert_config.num_layers,
        bert_config.num_heads,
        bert_config.head,
        bert_config.num_labels,
        bert_config.estimate_params() as f64 / 1_000_000.0
    );

    let device = parse_device(&project.train.device)?;
    info!("Device initialized: {:?}", device);

    let train_path = project
        .data
        .train_path
        .clone()
        .context("No training data: set data.train_path or pass --train")?;
    let valid_path = project
        .data
        .valid_path
        .clone()
        .context("No validation data: set data.valid_path or pass --valid")?;

    let train_data = BatchedDataset::from_jsonl(
        &train_path,
        &project.data,
        bert_config.head,
        project.data.shuffle_seed,
    )?;
    let valid_data =
        BatchedDataset::from_jsonl(&valid_path, &project.data, bert_config.head, None)?;
    let model = BertLabeler::new(bert_config, &device)?;
    let stop = install_stop_handler()?;

    let mut trainer =
        Trainer::new(project.train.clone(), model, train_data, valid_data)?.with_stop_flag(stop);
    let report = trainer.train()?;

    match report.stop_reason {
        StopReason::Completed => info!("Training complete."),
        StopReason::EarlyStopped { epoch } => info!("Training stopped early at epoch {}.", epoch),
        StopReason::Interrupted { epoch } => warn!("Training interrupted after epoch {}.", epoch),
    }
    match report.best_epoch {
        Some(epoch) => info!(
            "Best valid loss {:.3} at epoch {} -> '{}'",
            report.best_valid_loss,
            epoch,
            project.train.checkpoint_path().display()
        ),
        None => warn!("No checkpoint was written"),
    }
    info!(
        "Records written to '{}'",
        project.train.record_path().display()
    );
    Ok(())
}
