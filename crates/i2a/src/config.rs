//! Agent and trainer configuration.
//!
//! Configuration is plain data threaded through constructors. Nothing here is
//! global, so agents for several task modes can live in one process.

use crate::{I2aError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tch::Device;

/// MiniPacman task variants. Each mode fixes the set of rewards the
/// environment can emit, and therefore the reward head of the environment
/// model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    Regular,
    Avoid,
    Hunt,
    Ambush,
    Rush,
}

impl TaskMode {
    pub const ALL: [TaskMode; 5] = [
        TaskMode::Regular,
        TaskMode::Avoid,
        TaskMode::Hunt,
        TaskMode::Ambush,
        TaskMode::Rush,
    ];

    /// Ordered list of admissible rewards. The position of a reward is its
    /// category index.
    pub fn rewards(self) -> &'static [f32] {
        match self {
            TaskMode::Regular => &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
            TaskMode::Avoid => &[0.1, -0.1, -5.0, -10.0, -20.0],
            TaskMode::Hunt => &[0.0, 1.0, 10.0, -20.0],
            TaskMode::Ambush => &[0.0, -0.1, 10.0, -20.0],
            TaskMode::Rush => &[0.0, -0.1, 9.9],
        }
    }

    pub fn num_rewards(self) -> i64 {
        self.rewards().len() as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskMode::Regular => "regular",
            TaskMode::Avoid => "avoid",
            TaskMode::Hunt => "hunt",
            TaskMode::Ambush => "ambush",
            TaskMode::Rush => "rush",
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskMode {
    type Err = I2aError;

    fn from_str(s: &str) -> Result<Self> {
        TaskMode::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| I2aError::InvalidConfig(format!("unknown task mode '{}'", s)))
    }
}

/// How imagined rollouts are branched from each real state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutMode {
    /// One rollout per candidate action for every real state.
    #[default]
    Full,
    /// One rollout per real state, seeded with the distillation policy's
    /// action. Not supported; rejected at construction.
    Distilled,
}

/// Configuration shared by the imagination core, the rollout encoder and the
/// I2A network.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct I2aConfig {
    /// Task mode (selects the reward table)
    pub mode: TaskMode,
    /// Observation shape as (channels, height, width)
    pub in_shape: [i64; 3],
    /// Number of discrete actions
    pub num_actions: i64,
    /// Rollout encoder GRU hidden size
    pub hidden_size: i64,
    /// Number of imagined steps per rollout
    pub rollout_depth: usize,
    /// Rollout branching mode
    pub rollout_mode: RolloutMode,
    /// Width of the fusion layer in front of the actor/critic heads
    pub fusion_size: i64,

    /// Device the networks live on
    #[serde(skip, default = "default_device")]
    pub device: Device,
}

fn default_device() -> Device {
    Device::Cpu
}

impl Default for I2aConfig {
    fn default() -> Self {
        Self {
            mode: TaskMode::Regular,
            in_shape: [3, 15, 19],
            num_actions: 5,
            hidden_size: 256,
            rollout_depth: 1,
            rollout_mode: RolloutMode::Full,
            fusion_size: 256,
            device: Device::Cpu,
        }
    }
}

impl I2aConfig {
    pub fn new(mode: TaskMode, in_shape: [i64; 3], num_actions: i64) -> Self {
        Self {
            mode,
            in_shape,
            num_actions,
            ..Default::default()
        }
    }

    /// Create config for CUDA device
    pub fn cuda(mut self) -> Self {
        self.device = Device::Cuda(0);
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_hidden_size(mut self, hidden_size: i64) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_rollout_depth(mut self, depth: usize) -> Self {
        self.rollout_depth = depth;
        self
    }

    pub fn with_rollout_mode(mut self, mode: RolloutMode) -> Self {
        self.rollout_mode = mode;
        self
    }

    pub fn with_fusion_size(mut self, size: i64) -> Self {
        self.fusion_size = size;
        self
    }

    pub fn num_rewards(&self) -> i64 {
        self.mode.num_rewards()
    }

    /// Number of imagined rollouts per real state.
    pub fn rollouts_per_state(&self) -> i64 {
        match self.rollout_mode {
            RolloutMode::Full => self.num_actions,
            RolloutMode::Distilled => 1,
        }
    }

    /// Check the configuration for values no network can be built from.
    pub fn validate(&self) -> Result<()> {
        let [channels, height, width] = self.in_shape;
        if channels != 3 {
            return Err(I2aError::InvalidConfig(format!(
                "observations must have 3 colour channels, got {}",
                channels
            )));
        }
        // Two valid 3x3 convolutions (the second with stride 2) need 5 cells.
        if height < 5 || width < 5 {
            return Err(I2aError::InvalidConfig(format!(
                "observation must be at least 5x5, got {}x{}",
                height, width
            )));
        }
        if self.num_actions < 1 {
            return Err(I2aError::InvalidConfig(
                "num_actions must be at least 1".to_string(),
            ));
        }
        if self.hidden_size < 1 || self.fusion_size < 1 {
            return Err(I2aError::InvalidConfig(
                "hidden_size and fusion_size must be positive".to_string(),
            ));
        }
        if self.rollout_depth == 0 {
            return Err(I2aError::InvalidConfig(
                "rollout_depth must be at least 1".to_string(),
            ));
        }
        if self.rollout_mode != RolloutMode::Full {
            return Err(I2aError::UnsupportedConfiguration(
                "only full-rollout imagination is supported; \
                 distilled single-action rollouts are not implemented"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the A2C + distillation trainer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Environment steps collected per update
    pub num_steps: usize,
    /// Number of updates to run
    pub num_updates: u64,

    // RMSprop (I2A network)
    /// Learning rate
    pub learning_rate: f64,
    /// RMSprop epsilon
    pub rms_eps: f64,
    /// RMSprop smoothing constant
    pub rms_alpha: f64,

    /// Learning rate of the distillation policy's Adam optimizer
    pub distil_learning_rate: f64,
    /// Weight of the distillation cross-entropy
    pub distil_coef: f64,

    // A2C
    /// Discount factor
    pub gamma: f64,
    /// Entropy bonus coefficient
    pub entropy_coef: f64,
    /// Value loss coefficient
    pub value_loss_coef: f64,
    /// Maximum gradient norm
    pub max_grad_norm: f64,

    /// Checkpoint interval (updates, 0 disables periodic saves)
    pub checkpoint_interval: u64,
    /// Log interval (updates)
    pub log_interval: u64,

    /// Random seed
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            num_steps: 5,
            num_updates: 1_000_000,

            learning_rate: 7e-4,
            rms_eps: 1e-5,
            rms_alpha: 0.99,

            distil_learning_rate: 1e-3,
            distil_coef: 0.01,

            gamma: 0.99,
            entropy_coef: 0.01,
            value_loss_coef: 0.5,
            max_grad_norm: 0.5,

            checkpoint_interval: 10_000,
            log_interval: 10,

            seed: 42,
        }
    }
}

impl TrainerConfig {
    /// Set number of updates
    pub fn with_updates(mut self, updates: u64) -> Self {
        self.num_updates = updates;
        self
    }

    /// Set learning rate
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set steps per update
    pub fn with_num_steps(mut self, steps: usize) -> Self {
        self.num_steps = steps;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_steps == 0 {
            return Err(I2aError::InvalidConfig(
                "num_steps must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(I2aError::InvalidConfig(format!(
                "gamma must be in [0, 1], got {}",
                self.gamma
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_mode_parse_and_display() {
        for mode in TaskMode::ALL {
            let parsed: TaskMode = mode.to_string().parse().unwrap();
            assert_eq!(parsed, mode);
        }
        assert_eq!("HUNT".parse::<TaskMode>().unwrap(), TaskMode::Hunt);
        assert!("chase".parse::<TaskMode>().is_err());
    }

    #[test]
    fn test_reward_table_sizes() {
        assert_eq!(TaskMode::Regular.num_rewards(), 10);
        assert_eq!(TaskMode::Avoid.num_rewards(), 5);
        assert_eq!(TaskMode::Hunt.num_rewards(), 4);
        assert_eq!(TaskMode::Ambush.num_rewards(), 4);
        assert_eq!(TaskMode::Rush.num_rewards(), 3);
    }

    #[test]
    fn test_default_config_is_valid() {
        I2aConfig::default().validate().unwrap();
        TrainerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_distilled_mode_is_unsupported() {
        let config = I2aConfig::default().with_rollout_mode(RolloutMode::Distilled);
        assert!(matches!(
            config.validate(),
            Err(I2aError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        let config = I2aConfig::new(TaskMode::Hunt, [1, 15, 19], 5);
        assert!(matches!(config.validate(), Err(I2aError::InvalidConfig(_))));

        let config = I2aConfig::new(TaskMode::Hunt, [3, 4, 19], 5);
        assert!(matches!(config.validate(), Err(I2aError::InvalidConfig(_))));

        let config = I2aConfig::new(TaskMode::Hunt, [3, 15, 19], 0);
        assert!(matches!(config.validate(), Err(I2aError::InvalidConfig(_))));

        let config = I2aConfig::default().with_rollout_depth(0);
        assert!(matches!(config.validate(), Err(I2aError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_serde_skips_device() {
        let config = I2aConfig::new(TaskMode::Ambush, [3, 15, 19], 5).with_rollout_depth(3);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"ambush\""));
        assert!(!json.contains("device"));

        let parsed: I2aConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.mode, TaskMode::Ambush);
        assert_eq!(parsed.rollout_depth, 3);
        assert_eq!(parsed.device, Device::Cpu);
    }
}
