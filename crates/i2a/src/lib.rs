//! # I2A
//!
//! Imagination-Augmented Agents in Rust.
//!
//! ## Overview
//!
//! An I2A agent looks ahead before it acts. For every real observation it asks
//! a learned, categorical environment model what would happen under each
//! candidate action, summarises those imagined futures with a recurrent
//! encoder, and fuses the summaries with ordinary convolutional features to
//! produce action logits and a value estimate.
//!
//! The crate provides:
//! - The discretization codec between palette pixels / reward tables and
//!   categorical indices (`codec`)
//! - The `EnvironmentModel` and `DistillPolicy` seams plus concrete tch models
//! - `ImaginationCore`, `RolloutEncoder` and the `I2A` network (`imagination`)
//! - An A2C trainer with policy distillation (`training`)
//! - Checkpointing keyed by task mode and iteration (`checkpoint`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use i2a::prelude::*;
//!
//! let config = I2aConfig::new(TaskMode::Hunt, [3, 15, 19], 5);
//! let env_model = Arc::new(ConvEnvModel::new(&config, 7));
//! let distil = Arc::new(ActorCritic::new(config.in_shape, config.num_actions, config.device));
//!
//! let imagination = ImaginationCore::new(&config, env_model, distil)?;
//! let agent = I2A::new(&config, imagination)?;
//! let (logits, value) = agent.forward(&observations)?;
//! ```

pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod env;
pub mod imagination;
pub mod log;
pub mod policy;
pub mod training;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::codec::{Palette, RewardTable};
    pub use crate::config::{I2aConfig, RolloutMode, TaskMode, TrainerConfig};
    pub use crate::env::{VecEnv, VecStep};

    pub use crate::imagination::{
        ConvEnvModel, EnvironmentModel, ImaginationCore, ImaginedRollout, RolloutEncoder, I2A,
    };
    pub use crate::policy::{
        ActionEvaluation, ActorCritic, ActorCriticPolicy, DistillPolicy, Distribution, HasVarStore,
    };

    pub use crate::checkpoint::{CheckpointConfig, CheckpointManager, ModelKind};
    pub use crate::log::{CompositeLogger, ConsoleLogger, MetricLogger, NoOpLogger};
    pub use crate::training::{RolloutStorage, Trainer, UpdateStats};

    pub use crate::{I2aError, Result};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
///
/// None of these are transient: imagination is a pure computation, so every
/// variant points at a configuration defect or a codec/model contract
/// violation and is surfaced to the caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum I2aError {
    #[error("Unknown pixel {pixel:?}: rounded value is not in the palette")]
    UnknownPixel { pixel: [f32; 3] },

    #[error("Unknown category {index}: palette has {num_categories} entries")]
    UnknownCategory { index: i64, num_categories: usize },

    #[error("Unknown reward {reward} for task mode '{mode}'")]
    UnknownReward { mode: String, reward: f32 },

    #[error("Unknown reward category {index} for task mode '{mode}'")]
    UnknownRewardCategory { mode: String, index: i64 },

    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Checkpoint not found: {}", path.display())]
    MissingCheckpoint { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tensor error: {0}")]
    TensorError(#[from] tch::TchError),
}

pub type Result<T> = core::result::Result<T, I2aError>;

/// Returns `Ok(())` when `actual` equals `expected`, otherwise a `ShapeMismatch`.
pub(crate) fn ensure_shape(context: &'static str, expected: &[i64], actual: &[i64]) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(I2aError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}

/// Checks that `actual` is `[N, C, H, W]` with `[C, H, W] == item_shape` and
/// returns `N`. The batch dimension is reported as `-1` on mismatch.
pub(crate) fn ensure_batch_shape(
    context: &'static str,
    item_shape: &[i64; 3],
    actual: &[i64],
) -> Result<i64> {
    match actual {
        [batch, c, h, w] if [*c, *h, *w] == *item_shape => Ok(*batch),
        _ => {
            let mut expected = vec![-1];
            expected.extend_from_slice(item_shape);
            Err(I2aError::ShapeMismatch {
                context,
                expected,
                actual: actual.to_vec(),
            })
        }
    }
}
