//! Checkpointing of the environment model, the I2A network and the
//! distillation policy.
//!
//! Each network owns its own `VarStore` and is saved to its own file.

mod manager;

pub use manager::{CheckpointConfig, CheckpointManager, ModelKind};
