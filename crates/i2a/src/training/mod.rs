//! Training system for the I2A agent.
//!
//! Provides:
//! - `RolloutStorage` - fixed-horizon on-policy storage with discounted returns
//! - A2C and distillation losses
//! - `Trainer` - A2C loop that also distils the agent into the imagination policy

mod a2c;
mod storage;
mod trainer;

pub use a2c::{a2c_loss, action_loss, clip_grad_norm, distillation_loss, value_loss};
pub use storage::RolloutStorage;
pub use trainer::{Trainer, UpdateStats};
