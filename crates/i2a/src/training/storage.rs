//! On-policy rollout storage for A2C.

use crate::{ensure_shape, Result};
use tch::{Device, Kind, Tensor};

/// Fixed-horizon storage for `num_steps` transitions of `num_envs`
/// environments.
///
/// `states` and `masks` hold one extra slot: slot 0 is the state the rollout
/// starts from and slot `t + 1` the state reached after action `t`. A mask of
/// `0.0` at slot `t + 1` means the episode ended on step `t`.
pub struct RolloutStorage {
    /// Observations [T+1, N, C, H, W]
    pub states: Tensor,
    /// Actions taken [T, N] (Int64)
    pub actions: Tensor,
    /// Rewards received [T, N]
    pub rewards: Tensor,
    /// Continuation masks [T+1, N]
    pub masks: Tensor,
    /// Discounted returns [T+1, N]
    pub returns: Tensor,
    num_steps: usize,
    num_envs: usize,
    state_shape: [i64; 3],
    device: Device,
}

impl RolloutStorage {
    pub fn new(num_steps: usize, num_envs: usize, state_shape: [i64; 3], device: Device) -> Self {
        let (t, n) = (num_steps as i64, num_envs as i64);
        let [c, h, w] = state_shape;

        Self {
            states: Tensor::zeros([t + 1, n, c, h, w], (Kind::Float, device)),
            actions: Tensor::zeros([t, n], (Kind::Int64, device)),
            rewards: Tensor::zeros([t, n], (Kind::Float, device)),
            masks: Tensor::ones([t + 1, n], (Kind::Float, device)),
            returns: Tensor::zeros([t + 1, n], (Kind::Float, device)),
            num_steps,
            num_envs,
            state_shape,
            device,
        }
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn num_envs(&self) -> usize {
        self.num_envs
    }

    /// Set the state the next rollout starts from.
    pub fn set_initial_state(&mut self, states: &Tensor) -> Result<()> {
        self.check_states(states)?;
        self.states
            .get(0)
            .copy_(&states.to_device(self.device).to_kind(Kind::Float));
        Ok(())
    }

    /// State the policy acts on at `step`.
    pub fn state(&self, step: usize) -> Tensor {
        self.states.get(step as i64)
    }

    /// Record the outcome of step `step`: the action taken from `state(step)`,
    /// the reward received, the next state and its continuation mask.
    pub fn insert(
        &mut self,
        step: usize,
        next_states: &Tensor,
        actions: &Tensor,
        rewards: &[f32],
        masks: &[f32],
    ) -> Result<()> {
        self.check_states(next_states)?;
        let n = self.num_envs as i64;
        ensure_shape("rollout actions", &[n], &[actions.numel() as i64])?;
        ensure_shape(
            "rollout rewards/masks",
            &[n, n],
            &[rewards.len() as i64, masks.len() as i64],
        )?;

        let t = step as i64;
        self.states
            .get(t + 1)
            .copy_(&next_states.to_device(self.device).to_kind(Kind::Float));
        self.actions
            .get(t)
            .copy_(&actions.reshape([-1]).to_device(self.device).to_kind(Kind::Int64));
        self.rewards
            .get(t)
            .copy_(&Tensor::from_slice(rewards).to_device(self.device));
        self.masks
            .get(t + 1)
            .copy_(&Tensor::from_slice(masks).to_device(self.device));
        Ok(())
    }

    /// Discounted returns bootstrapped from `next_value` (`[N]` or `[N, 1]`),
    /// cut at episode boundaries by the masks:
    /// `R_t = r_t + gamma * mask_{t+1} * R_{t+1}`, `R_T = next_value`.
    ///
    /// Returns the first `T` rows, `[T, N]`.
    pub fn compute_returns(&mut self, next_value: &Tensor, gamma: f64) -> Tensor {
        let last = self.num_steps as i64;
        self.returns.get(last).copy_(
            &next_value
                .reshape([-1])
                .detach()
                .to_device(self.device)
                .to_kind(Kind::Float),
        );

        for t in (0..last).rev() {
            let discounted = self.returns.get(t + 1) * gamma * self.masks.get(t + 1);
            self.returns
                .get(t)
                .copy_(&(discounted + self.rewards.get(t)));
        }

        self.returns.narrow(0, 0, last)
    }

    /// Observations the actions were taken from, flattened to `[T*N, C, H, W]`.
    pub fn flat_states(&self) -> Tensor {
        let [c, h, w] = self.state_shape;
        self.states
            .narrow(0, 0, self.num_steps as i64)
            .reshape([-1, c, h, w])
    }

    /// Actions flattened to `[T*N]`, in the same order as `flat_states`.
    pub fn flat_actions(&self) -> Tensor {
        self.actions.reshape([-1])
    }

    /// Carry the final state and mask over as the start of the next rollout.
    pub fn after_update(&mut self) {
        let last = self.num_steps as i64;
        self.states.get(0).copy_(&self.states.get(last));
        self.masks.get(0).copy_(&self.masks.get(last));
    }

    fn check_states(&self, states: &Tensor) -> Result<()> {
        let [c, h, w] = self.state_shape;
        ensure_shape(
            "rollout states",
            &[self.num_envs as i64, c, h, w],
            &states.size(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(steps: usize, envs: usize) -> RolloutStorage {
        RolloutStorage::new(steps, envs, [3, 5, 5], Device::Cpu)
    }

    fn filled(envs: i64, value: f64) -> Tensor {
        Tensor::full([envs, 3, 5, 5], value, (Kind::Float, Device::Cpu))
    }

    fn actions(envs: i64) -> Tensor {
        Tensor::zeros([envs], (Kind::Int64, Device::Cpu))
    }

    #[test]
    fn test_storage_shapes() {
        let storage = storage(5, 4);
        assert_eq!(storage.states.size(), [6, 4, 3, 5, 5]);
        assert_eq!(storage.actions.size(), [5, 4]);
        assert_eq!(storage.masks.size(), [6, 4]);
        assert_eq!(storage.flat_states().size(), [20, 3, 5, 5]);
        assert_eq!(storage.flat_actions().size(), [20]);
    }

    #[test]
    fn test_returns_without_termination() {
        let mut storage = storage(3, 1);
        for step in 0..3 {
            storage
                .insert(step, &filled(1, 0.0), &actions(1), &[1.0], &[1.0])
                .unwrap();
        }
        let next_value = Tensor::from_slice(&[10.0f32]);
        let returns = storage.compute_returns(&next_value, 0.5);

        // R2 = 1 + 0.5 * 10 = 6, R1 = 1 + 3 = 4, R0 = 1 + 2 = 3
        let returns = Vec::<f32>::try_from(returns.reshape([-1])).unwrap();
        assert_eq!(returns, vec![3.0, 4.0, 6.0]);
    }

    #[test]
    fn test_returns_respect_masks() {
        let mut storage = storage(3, 2);
        let rewards = [[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]];
        // Env 0 ends its episode on step 1, env 1 never does
        let masks = [[1.0, 1.0], [0.0, 1.0], [1.0, 1.0]];
        for step in 0..3 {
            storage
                .insert(step, &filled(2, 0.0), &actions(2), &rewards[step], &masks[step])
                .unwrap();
        }
        let next_value = Tensor::from_slice(&[4.0f32, 4.0]);
        let returns = storage.compute_returns(&next_value.reshape([2, 1]), 0.5);
        let returns = Vec::<f32>::try_from(returns.reshape([-1])).unwrap();

        // env 0: R2 = 1 + 2 = 3; R1 = 1 (cut); R0 = 1 + 0.5 = 1.5
        // env 1: R2 = 2 + 2 = 4; R1 = 2 + 2 = 4; R0 = 2 + 2 = 4
        assert_eq!(returns, vec![1.5, 4.0, 1.0, 4.0, 3.0, 4.0]);
    }

    #[test]
    fn test_after_update_carries_last_state() {
        let mut storage = storage(2, 1);
        storage.set_initial_state(&filled(1, 1.0)).unwrap();
        storage
            .insert(0, &filled(1, 2.0), &actions(1), &[0.0], &[1.0])
            .unwrap();
        storage
            .insert(1, &filled(1, 3.0), &actions(1), &[0.0], &[0.0])
            .unwrap();

        storage.after_update();
        assert!(storage.state(0).equal(&filled(1, 3.0)));
        assert_eq!(storage.masks.get(0).double_value(&[0]), 0.0);
    }

    #[test]
    fn test_insert_rejects_wrong_batch() {
        let mut storage = storage(2, 2);
        assert!(storage
            .insert(0, &filled(3, 0.0), &actions(2), &[0.0, 0.0], &[1.0, 1.0])
            .is_err());
        assert!(storage
            .insert(0, &filled(2, 0.0), &actions(2), &[0.0], &[1.0, 1.0])
            .is_err());
    }
}
