//! Policies and the seams the imagination core and the trainer consume.
//!
//! - `ActorCriticPolicy` - forward / sample / evaluate interface used by the trainer
//! - `DistillPolicy` - action selection inside imagined rollouts
//! - `ActorCritic` - small convolutional actor-critic, used as the distillation policy

mod cnn;
mod distribution;

pub use cnn::{ActorCritic, ConvFeatures};
pub use distribution::Distribution;

use crate::Result;
use tch::{nn, Kind, Tensor};

/// Trait for models that own a VarStore (for optimization and checkpointing)
pub trait HasVarStore {
    /// Get mutable reference to the VarStore
    fn var_store_mut(&mut self) -> &mut nn::VarStore;

    /// Get reference to the VarStore
    fn var_store(&self) -> &nn::VarStore;

    /// Number of trainable scalars
    fn num_parameters(&self) -> usize {
        self.var_store()
            .trainable_variables()
            .iter()
            .map(|t| t.numel())
            .sum()
    }
}

/// Result of scoring a batch of taken actions
#[derive(Debug)]
pub struct ActionEvaluation {
    /// Action logits [B, A]
    pub logits: Tensor,
    /// Log-probability of each given action [B, 1]
    pub log_probs: Tensor,
    /// Value estimates [B, 1]
    pub values: Tensor,
    /// Mean entropy of the action distribution (scalar)
    pub entropy: Tensor,
}

/// Interface the training loop uses on a policy/value network.
pub trait ActorCriticPolicy {
    /// Action logits `[B, A]` and value estimates `[B, 1]`.
    fn forward(&self, states: &Tensor) -> Result<(Tensor, Tensor)>;

    /// Sample one action per state from the categorical policy. Returns `[B]` Int64.
    fn sample_action(&self, states: &Tensor) -> Result<Tensor> {
        let (logits, _) = self.forward(states)?;
        Ok(Distribution::Categorical { logits }.sample())
    }

    /// Score `actions` (`[B]` or `[B, 1]`) under the current policy.
    fn evaluate_actions(&self, states: &Tensor, actions: &Tensor) -> Result<ActionEvaluation> {
        let (logits, values) = self.forward(states)?;
        let dist = Distribution::Categorical {
            logits: logits.shallow_clone(),
        };
        let log_probs = dist.log_prob(actions).reshape([-1, 1]);
        let entropy = dist.entropy().mean(Kind::Float);
        Ok(ActionEvaluation {
            logits,
            log_probs,
            values,
            entropy,
        })
    }
}

/// Action selection inside imagined rollouts.
///
/// Must accept real and imagined state batches alike and return `[N]` Int64
/// action indices. Implementations are expected to be deterministic so that
/// imagination is reproducible.
pub trait DistillPolicy {
    fn act(&self, states: &Tensor) -> Result<Tensor>;
}
