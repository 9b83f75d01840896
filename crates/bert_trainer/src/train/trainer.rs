//! Trainer - epoch loop driver
//!
//! One training pass and one validation pass per epoch, a per-epoch record,
//! best-validation checkpointing, plateau scheduling and optional early stop.

use anyhow::{ensure, Result};
use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use bert_engine::device_utils::{cuda_ordinal, get_vram_info, parse_device};
use bert_engine::Mode;

use super::checkpoint::{save_checkpoint, CheckpointState, OptimizerState};
use super::optim::{accumulate_grads, clip_grad_norm, GradScaler, ReduceLrOnPlateau};
use super::record::{loss_and_ppl, save_records, EpochRecord};
use super::report::{format_elapsed, print_epoch};
use crate::config::{Strategy, TrainConfig};
use crate::data::DataSource;
use crate::model::TrainableModel;

/// Backbone learning rate relative to the head under `Strategy::Fine`
const BACKBONE_LR_SCALE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    EarlyStopped { epoch: usize },
    Interrupted { epoch: usize },
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub records: Vec<EpochRecord>,
    pub best_epoch: Option<usize>,
    pub best_valid_loss: f64,
    /// Epochs after which the checkpoint was (over)written
    pub checkpoint_epochs: Vec<usize>,
    pub stop_reason: StopReason,
}

/// Optimizers and everything an update step touches.
/// Kept apart from the data sources so an epoch can iterate one while
/// mutating the other.
struct Updater {
    primary: AdamW,
    /// Backbone optimizer for `Strategy::Fine`
    secondary: Option<AdamW>,
    params: ParamsAdamW,
    trainable: Vec<Var>,
    scaler: GradScaler,
    clip: f64,
    steps: usize,
}

impl Updater {
    /// Unscale, clip, step. Non-finite gradients skip the step.
    fn apply(&mut self, mut grads: GradStore) -> Result<()> {
        let found_inf = self.scaler.unscale(&mut grads, &self.trainable)?;
        if found_inf {
            self.scaler.update(true);
            return Ok(());
        }

        let norm = clip_grad_norm(&mut grads, &self.trainable, self.clip)?;
        self.primary.step(&grads)?;
        if let Some(secondary) = self.secondary.as_mut() {
            secondary.step(&grads)?;
        }
        self.scaler.update(false);
        self.steps += 1;

        if self.steps % 100 == 0 {
            debug!("step {} | grad norm {:.4}", self.steps, norm);
        }
        Ok(())
    }

    fn state(&self) -> OptimizerState {
        OptimizerState {
            learning_rate: self.primary.learning_rate(),
            backbone_learning_rate: self.secondary.as_ref().map(|opt| opt.learning_rate()),
            beta1: self.params.beta1,
            beta2: self.params.beta2,
            eps: self.params.eps,
            weight_decay: self.params.weight_decay,
            steps: self.steps,
        }
    }
}

pub struct Trainer<M, T, V> {
    config: TrainConfig,
    model: M,
    train_data: T,
    valid_data: V,
    device: Device,
    updater: Updater,
    scheduler: ReduceLrOnPlateau,
    stop: Arc<AtomicBool>,
}

impl<M, T, V> Trainer<M, T, V>
where
    M: TrainableModel,
    T: DataSource,
    V: DataSource,
{
    pub fn new(config: TrainConfig, model: M, train_data: T, valid_data: V) -> Result<Self> {
        config.validate()?;
        let device = parse_device(&config.device)?;

        let groups = model.param_groups()?;
        let (primary_vars, secondary_vars) = match config.strategy {
            Strategy::Fine => (groups.head, groups.backbone),
            Strategy::Full => {
                let mut all = groups.backbone;
                all.extend(groups.head);
                (all, Vec::new())
            }
            Strategy::Frozen => (groups.head, Vec::new()),
        };
        ensure!(
            !primary_vars.is_empty(),
            "Model has no trainable parameters for strategy {:?}",
            config.strategy
        );

        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let mut trainable = primary_vars.clone();
        trainable.extend(secondary_vars.iter().cloned());

        let primary = AdamW::new(primary_vars, params.clone())?;
        let secondary = if secondary_vars.is_empty() {
            None
        } else {
            Some(AdamW::new(
                secondary_vars,
                ParamsAdamW {
                    lr: config.learning_rate * BACKBONE_LR_SCALE,
                    ..params.clone()
                },
            )?)
        };

        let scaler = GradScaler::new(config.mixed_precision);
        let n_params: usize = trainable.iter().map(|v| v.elem_count()).sum();
        info!(
            "Trainer ready: strategy={:?}, params={}, device={:?}, accumulate={}, scaling={}",
            config.strategy,
            n_params,
            device,
            config.iters_to_accumulate,
            scaler.is_enabled()
        );

        let updater = Updater {
            primary,
            secondary,
            params,
            trainable,
            scaler,
            clip: config.clip,
            steps: 0,
        };
        let scheduler = ReduceLrOnPlateau::new(config.scheduler.clone());

        Ok(Self {
            config,
            model,
            train_data,
            valid_data,
            device,
            updater,
            scheduler,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Once the flag is set, training ends at the next epoch boundary.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn optimizer_steps(&self) -> usize {
        self.updater.steps
    }

    pub fn learning_rate(&self) -> f64 {
        self.updater.primary.learning_rate()
    }

    pub fn train(&mut self) -> Result<TrainReport> {
        let n_epochs = self.config.n_epochs;
        let ckpt_path = self.config.checkpoint_path();
        let mut records = Vec::with_capacity(n_epochs);
        let mut best_loss = f64::INFINITY;
        let mut best_epoch = None;
        let mut checkpoint_epochs = Vec::new();
        let mut bad_epochs = 0;
        let mut stop_reason = StopReason::Completed;

        info!(
            "Training '{}' for {} epochs (lr={}, clip={})",
            self.config.model_name, n_epochs, self.config.learning_rate, self.config.clip
        );

        for epoch in 1..=n_epochs {
            let start = Instant::now();
            let (train_loss, train_ppl) = self.train_epoch()?;
            let (valid_loss, valid_ppl) = self.valid_epoch()?;

            let record = EpochRecord {
                epoch,
                train_loss,
                train_ppl,
                valid_loss,
                valid_ppl,
                learning_rate: self.updater.primary.learning_rate(),
                train_time: format_elapsed(start.elapsed()),
            };
            print_epoch(&record, n_epochs);
            records.push(record);

            if self.scheduler.step(valid_loss) {
                if let Some(lr) = self.scheduler.reduce(&mut self.updater.primary) {
                    info!("Plateau: learning rate reduced to {:e}", lr);
                }
                if let Some(secondary) = self.updater.secondary.as_mut() {
                    if let Some(lr) = self.scheduler.reduce(secondary) {
                        info!("Plateau: backbone learning rate reduced to {:e}", lr);
                    }
                }
            }

            if valid_loss < best_loss {
                best_loss = valid_loss;
                best_epoch = Some(epoch);
                bad_epochs = 0;
                let state =
                    CheckpointState::new(epoch, valid_loss, &ckpt_path, self.updater.state());
                save_checkpoint(&ckpt_path, &self.model, &state)?;
                checkpoint_epochs.push(epoch);
                info!(
                    "New best valid loss {:.3} at epoch {}, saved '{}'",
                    valid_loss,
                    epoch,
                    ckpt_path.display()
                );
            } else {
                bad_epochs += 1;
            }

            if let Some(ordinal) = cuda_ordinal(&self.device) {
                if let Ok((free, total)) = get_vram_info(ordinal) {
                    debug!(
                        "[VRAM] used {:.2} MB of {:.2} MB",
                        (total - free) as f64 / (1024.0 * 1024.0),
                        total as f64 / (1024.0 * 1024.0)
                    );
                }
            }

            if self.config.early_stop && bad_epochs >= self.config.patience {
                info!(
                    "Early stop: no improvement for {} epochs (best {:.3} at epoch {:?})",
                    bad_epochs, best_loss, best_epoch
                );
                stop_reason = StopReason::EarlyStopped { epoch };
                break;
            }
            if self.stop.load(Ordering::SeqCst) {
                warn!("Stop requested, ending training after epoch {}", epoch);
                stop_reason = StopReason::Interrupted { epoch };
                break;
            }
        }

        save_records(&self.config.record_path(), &records)?;

        Ok(TrainReport {
            records,
            best_epoch,
            best_valid_loss: best_loss,
            checkpoint_epochs,
            stop_reason,
        })
    }

    /// One pass over the training data. Returns (mean loss, perplexity).
    pub fn train_epoch(&mut self) -> Result<(f64, f64)> {
        ensure!(!self.train_data.is_empty(), "Training data source is empty");
        self.model.set_mode(Mode::Train);

        let accumulate = self.config.iters_to_accumulate;
        let pb = progress_bar(self.train_data.len(), "train")?;
        let mut loss_sum = 0.0;
        let mut n_batches = 0;
        let mut pending: Option<GradStore> = None;
        let mut micro = 0;

        for batch in self.train_data.iter() {
            let batch = batch?.to_device(&self.device)?;
            let loss =
                self.model
                    .forward_loss(&batch.input_ids, &batch.token_type_ids, &batch.labels)?;
            let value = scalar(&loss)?;
            loss_sum += value;
            n_batches += 1;

            let scaled = self.updater.scaler.scale_loss(&(loss / accumulate as f64)?)?;
            let grads = scaled.backward()?;
            pending = Some(match pending.take() {
                Some(acc) => accumulate_grads(acc, grads, &self.updater.trainable)?,
                None => grads,
            });

            micro += 1;
            if micro == accumulate {
                if let Some(grads) = pending.take() {
                    self.updater.apply(grads)?;
                }
                micro = 0;
            }

            pb.set_message(format!("loss {:.4}", value));
            pb.inc(1);
        }
        // partial accumulation group
        if let Some(grads) = pending.take() {
            self.updater.apply(grads)?;
        }
        pb.finish_and_clear();

        ensure!(n_batches > 0, "Training data source yielded no batches");
        Ok(loss_and_ppl(loss_sum, n_batches))
    }

    /// One pass over the validation data without gradients.
    pub fn valid_epoch(&mut self) -> Result<(f64, f64)> {
        self.model.set_mode(Mode::Eval);
        evaluate_loss(&self.model, &self.valid_data, &self.device)
    }
}

/// Mean loss and perplexity of `model` over `data`. The caller sets the mode.
pub fn evaluate_loss<M, D>(model: &M, data: &D, device: &Device) -> Result<(f64, f64)>
where
    M: TrainableModel + ?Sized,
    D: DataSource + ?Sized,
{
    ensure!(!data.is_empty(), "Validation data source is empty");

    let pb = progress_bar(data.len(), "valid")?;
    let mut loss_sum = 0.0;
    let mut n_batches = 0;
    for batch in data.iter() {
        let batch = batch?.to_device(device)?;
        let loss = model
            .forward_loss(&batch.input_ids, &batch.token_type_ids, &batch.labels)?
            .detach();
        loss_sum += scalar(&loss)?;
        n_batches += 1;
        pb.inc(1);
    }
    pb.finish_and_clear();

    ensure!(n_batches > 0, "Validation data source yielded no batches");
    Ok(loss_and_ppl(loss_sum, n_batches))
}

fn scalar(loss: &Tensor) -> Result<f64> {
    Ok(loss.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}

fn progress_bar(len: usize, label: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:>5} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(label);
    Ok(pb)
}
