//! Optimization glue around candle's AdamW
//!
//! - clip: global-norm gradient clipping and gradient accumulation
//! - plateau: reduce-on-plateau learning rate scheduler
//! - scaler: dynamic loss scaling for mixed precision

pub mod clip;
pub mod plateau;
pub mod scaler;

pub use clip::{accumulate_grads, clip_grad_norm, grad_norm};
pub use plateau::ReduceLrOnPlateau;
pub use scaler::GradScaler;
