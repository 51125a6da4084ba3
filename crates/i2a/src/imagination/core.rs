use super::models::EnvironmentModel;
use crate::codec::{Palette, RewardTable};
use crate::config::I2aConfig;
use crate::policy::DistillPolicy;
use crate::{ensure_batch_shape, ensure_shape, I2aError, Result};
use std::sync::Arc;
use tch::{Kind, Tensor};

/// Imagined trajectories for one batch of real states.
#[derive(Debug)]
pub struct ImaginedRollout {
    /// Imagined observations `[T, N, C, H, W]`
    pub states: Tensor,
    /// One-hot imagined rewards `[T, N, R]`
    pub rewards: Tensor,
}

impl ImaginedRollout {
    /// Number of imagined steps (T)
    pub fn depth(&self) -> i64 {
        self.states.size()[0]
    }

    /// Number of rollouts (N = real batch x action branches)
    pub fn rollout_batch(&self) -> i64 {
        self.states.size()[1]
    }
}

/// Drives the environment model autoregressively to imagine rollouts.
///
/// In full-rollout mode every real state is paired with every action, so a
/// batch of `B` states yields `B * A` rollouts. Rollout `b * A + a` starts
/// from state `b` with action `a`; later actions come from the distillation
/// policy applied to the imagined state.
pub struct ImaginationCore {
    in_shape: [i64; 3],
    num_actions: i64,
    rollout_depth: usize,
    palette: Palette,
    rewards: RewardTable,
    env_model: Arc<dyn EnvironmentModel>,
    distil_policy: Arc<dyn DistillPolicy>,
}

impl ImaginationCore {
    /// Build an imagination core. Fails with `UnsupportedConfiguration` for
    /// anything other than full-rollout mode.
    pub fn new(
        config: &I2aConfig,
        env_model: Arc<dyn EnvironmentModel>,
        distil_policy: Arc<dyn DistillPolicy>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            in_shape: config.in_shape,
            num_actions: config.num_actions,
            rollout_depth: config.rollout_depth,
            palette: Palette::minipacman(),
            rewards: RewardTable::new(config.mode),
            env_model,
            distil_policy,
        })
    }

    /// Replace the pixel palette. The environment model must predict over the
    /// same palette.
    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = palette;
        self
    }

    pub fn in_shape(&self) -> [i64; 3] {
        self.in_shape
    }

    pub fn num_actions(&self) -> i64 {
        self.num_actions
    }

    pub fn num_rewards(&self) -> i64 {
        self.rewards.len() as i64
    }

    pub fn rollout_depth(&self) -> usize {
        self.rollout_depth
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Number of rollouts imagined for a real batch of `batch_size` states.
    pub fn rollout_batch_size(&self, batch_size: i64) -> i64 {
        batch_size * self.num_actions
    }

    /// Imagine `rollout_depth` steps ahead of every (state, action) pair.
    ///
    /// `states` is `[B, C, H, W]`. Returns states `[T, B*A, C, H, W]` and
    /// one-hot rewards `[T, B*A, R]`. The environment model and the
    /// distillation policy run without gradient tracking and the returned
    /// tensors are detached: nothing downstream can backpropagate into either
    /// model through imagination.
    pub fn imagine(&self, states: &Tensor) -> Result<ImaginedRollout> {
        let batch_size = ensure_batch_shape("imagination input", &self.in_shape, &states.size())?;
        tracing::debug!(
            batch_size,
            rollout_batch = self.rollout_batch_size(batch_size),
            depth = self.rollout_depth,
            "Imagining rollouts"
        );

        let rollout = tch::no_grad(|| self.rollout(&states.detach().to_kind(Kind::Float)))?;
        Ok(ImaginedRollout {
            states: rollout.states.detach(),
            rewards: rollout.rewards.detach(),
        })
    }

    fn rollout(&self, states: &Tensor) -> Result<ImaginedRollout> {
        let (mut state, mut action) = self.expand_full(states);
        let rollout_batch = state.size()[0];

        let mut rollout_states = Vec::with_capacity(self.rollout_depth);
        let mut rollout_rewards = Vec::with_capacity(self.rollout_depth);

        for step in 0..self.rollout_depth {
            let inputs = Tensor::cat(&[&state, &self.action_planes(&action)], 1);
            let (state_logits, reward_logits) = self.env_model.predict(&inputs)?;
            self.check_predictions(rollout_batch, &state_logits, &reward_logits)?;

            // Most likely outcome, no sampling
            let imagined_state = self.palette.targets_to_observation(
                &state_logits.argmax(1, false),
                self.in_shape[1],
                self.in_shape[2],
            )?;
            let imagined_reward = self.rewards.one_hot(&reward_logits.argmax(1, false))?;

            rollout_states.push(imagined_state.shallow_clone());
            rollout_rewards.push(imagined_reward);

            if step + 1 < self.rollout_depth {
                action = self.next_actions(&imagined_state, rollout_batch)?;
            }
            state = imagined_state;
            tracing::trace!(step, "Imagined step");
        }

        Ok(ImaginedRollout {
            states: Tensor::stack(&rollout_states, 0),
            rewards: Tensor::stack(&rollout_rewards, 0),
        })
    }

    /// Repeat each state once per action (batch-major) and pair it with the
    /// action indices `0..A`.
    fn expand_full(&self, states: &Tensor) -> (Tensor, Tensor) {
        let [c, h, w] = self.in_shape;
        let batch_size = states.size()[0];
        let a = self.num_actions;

        let expanded = states
            .unsqueeze(1)
            .expand([batch_size, a, c, h, w], false)
            .reshape([batch_size * a, c, h, w]);
        let actions = Tensor::arange(a, (Kind::Int64, states.device())).repeat([batch_size]);
        (expanded, actions)
    }

    /// One-hot action planes `[N, A, H, W]` for `[N]` action indices.
    fn action_planes(&self, actions: &Tensor) -> Tensor {
        let [_, h, w] = self.in_shape;
        let n = actions.size()[0];
        actions
            .one_hot(self.num_actions)
            .to_kind(Kind::Float)
            .reshape([n, self.num_actions, 1, 1])
            .expand([n, self.num_actions, h, w], false)
    }

    fn next_actions(&self, imagined_state: &Tensor, rollout_batch: i64) -> Result<Tensor> {
        let actions = self
            .distil_policy
            .act(imagined_state)?
            .to_device(imagined_state.device())
            .to_kind(Kind::Int64)
            .reshape([-1]);
        ensure_shape("distillation actions", &[rollout_batch], &actions.size())?;

        if actions.numel() > 0 {
            let min = actions.min().int64_value(&[]);
            let max = actions.max().int64_value(&[]);
            if min < 0 || max >= self.num_actions {
                return Err(I2aError::InvalidConfig(format!(
                    "distillation policy produced action outside [0, {})",
                    self.num_actions
                )));
            }
        }
        Ok(actions)
    }

    fn check_predictions(
        &self,
        rollout_batch: i64,
        state_logits: &Tensor,
        reward_logits: &Tensor,
    ) -> Result<()> {
        let [_, h, w] = self.in_shape;
        ensure_shape(
            "environment model state logits",
            &[rollout_batch * h * w, self.palette.len() as i64],
            &state_logits.size(),
        )?;
        ensure_shape(
            "environment model reward logits",
            &[rollout_batch, self.num_rewards()],
            &reward_logits.size(),
        )
    }
}
