//! Train Module - Training pipeline
//!
//! - TrainArgs: CLI arguments for training
//! - Trainer: the epoch loop driver
//! - optim: gradient clipping, accumulation, loss scaling, plateau scheduler
//! - checkpoint / record / report: persistence and progress output
//! - training_loop: CLI entry point wiring config, data and model together

pub mod args;
pub mod checkpoint;
pub mod optim;
pub mod record;
pub mod report;
pub mod trainer;
pub mod training_loop;

pub use args::TrainArgs;
pub use checkpoint::{load_checkpoint_state, save_checkpoint, CheckpointState};
pub use record::{save_records, EpochRecord};
pub use report::{measure_time, print_epoch};
pub use trainer::{evaluate_loss, StopReason, TrainReport, Trainer};
pub use training_loop::run;
