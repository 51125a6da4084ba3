//! Imagination: categorical world-model rollouts fused into a policy.
//!
//! - `EnvironmentModel` / `ConvEnvModel` - predicts next-frame pixel categories and reward categories
//! - `ImaginationCore` - autoregressive, action-conditioned simulation
//! - `RolloutEncoder` - conv + GRU summary of each imagined rollout
//! - `I2A` - fuses imagination summaries with model-free features

mod agent;
mod core;
mod encoder;
mod models;

pub use self::agent::I2A;
pub use self::core::{ImaginationCore, ImaginedRollout};
pub use self::encoder::RolloutEncoder;
pub use self::models::{ConvEnvModel, EnvironmentModel};
