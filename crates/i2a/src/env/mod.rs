//! Environment interface consumed by the trainer.
//!
//! The game itself lives outside this crate: anything that can batch-step
//! `num_envs` pixel-observation environments implements `VecEnv`.

use crate::{ensure_shape, I2aError, Result};
use tch::Tensor;

/// Result of stepping every environment once.
#[derive(Debug)]
pub struct VecStep {
    /// Next observations `[num_envs, C, H, W]`. Environments that finished are
    /// expected to have been reset already.
    pub states: Tensor,
    /// Reward received by each environment
    pub rewards: Vec<f32>,
    /// Whether each environment's episode ended on this step
    pub dones: Vec<bool>,
}

impl VecStep {
    /// `1.0` for environments still running, `0.0` for finished ones.
    pub fn masks(&self) -> Vec<f32> {
        self.dones
            .iter()
            .map(|&d| if d { 0.0 } else { 1.0 })
            .collect()
    }
}

/// Batched, auto-resetting environment.
pub trait VecEnv {
    fn num_envs(&self) -> usize;

    /// Observation shape `[C, H, W]`
    fn observation_shape(&self) -> [i64; 3];

    fn num_actions(&self) -> i64;

    /// Reset every environment. Returns `[num_envs, C, H, W]`.
    fn reset(&mut self, seed: Option<u64>) -> Result<Tensor>;

    /// Step with one action index per environment (`[num_envs]` Int64).
    fn step(&mut self, actions: &Tensor) -> Result<VecStep>;
}

/// Check that a step result matches the environment's declared sizes.
pub(crate) fn check_step<V: VecEnv + ?Sized>(env: &V, step: &VecStep) -> Result<()> {
    let num_envs = env.num_envs();
    let [c, h, w] = env.observation_shape();
    ensure_shape(
        "environment step states",
        &[num_envs as i64, c, h, w],
        &step.states.size(),
    )?;
    if step.rewards.len() != num_envs || step.dones.len() != num_envs {
        return Err(I2aError::ShapeMismatch {
            context: "environment step rewards/dones",
            expected: vec![num_envs as i64, num_envs as i64],
            actual: vec![step.rewards.len() as i64, step.dones.len() as i64],
        });
    }
    Ok(())
}

/// Tracks per-environment episode returns across auto-resets.
///
/// `final_returns` holds the return of the most recently finished episode of
/// each environment (zero until one finishes).
#[derive(Clone, Debug)]
pub struct EpisodeTracker {
    running: Vec<f32>,
    final_returns: Vec<f32>,
    episodes: u64,
}

impl EpisodeTracker {
    pub fn new(num_envs: usize) -> Self {
        Self {
            running: vec![0.0; num_envs],
            final_returns: vec![0.0; num_envs],
            episodes: 0,
        }
    }

    pub fn record(&mut self, rewards: &[f32], dones: &[bool]) {
        for ((running, last), (&reward, &done)) in self
            .running
            .iter_mut()
            .zip(self.final_returns.iter_mut())
            .zip(rewards.iter().zip(dones))
        {
            *running += reward;
            if done {
                *last = *running;
                *running = 0.0;
                self.episodes += 1;
            }
        }
    }

    pub fn final_returns(&self) -> &[f32] {
        &self.final_returns
    }

    /// Number of finished episodes seen so far
    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    pub fn mean_final_return(&self) -> f64 {
        if self.final_returns.is_empty() {
            return 0.0;
        }
        self.final_returns.iter().map(|&r| r as f64).sum::<f64>() / self.final_returns.len() as f64
    }

    pub fn max_final_return(&self) -> f64 {
        self.final_returns
            .iter()
            .fold(f32::NEG_INFINITY, |acc, &r| acc.max(r)) as f64
    }

    pub fn min_final_return(&self) -> f64 {
        self.final_returns
            .iter()
            .fold(f32::INFINITY, |acc, &r| acc.min(r)) as f64
    }
}
