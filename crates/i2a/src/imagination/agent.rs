use super::core::ImaginationCore;
use super::encoder::RolloutEncoder;
use crate::config::I2aConfig;
use crate::policy::{ActorCriticPolicy, ConvFeatures, HasVarStore};
use crate::{ensure_batch_shape, ensure_shape, Result};
use tch::{nn, nn::Module, Device, Tensor};

/// Imagination-augmented policy/value network.
///
/// `forward` imagines one rollout per (state, action), encodes every rollout,
/// concatenates each state's `A` encodings into an imagination summary of
/// size `A * hidden_size`, and fuses it with model-free conv features of the
/// real state before the actor and critic heads.
///
/// Each call is independent: no recurrent state is carried across calls, and
/// the environment model and distillation policy are only read.
pub struct I2A {
    vs: nn::VarStore,
    imagination: ImaginationCore,
    encoder: RolloutEncoder,
    features: ConvFeatures,
    fc: nn::Linear,
    actor: nn::Linear,
    critic: nn::Linear,
    num_actions: i64,
    device: Device,
}

impl I2A {
    pub fn new(config: &I2aConfig, imagination: ImaginationCore) -> Result<Self> {
        config.validate()?;
        ensure_shape(
            "imagination core",
            &[
                config.in_shape[0],
                config.in_shape[1],
                config.in_shape[2],
                config.num_actions,
                config.num_rewards(),
            ],
            &[
                imagination.in_shape()[0],
                imagination.in_shape()[1],
                imagination.in_shape()[2],
                imagination.num_actions(),
                imagination.num_rewards(),
            ],
        )?;

        let vs = nn::VarStore::new(config.device);
        let root = vs.root();

        let encoder = RolloutEncoder::new(
            &(&root / "encoder"),
            config.in_shape,
            config.num_rewards(),
            config.hidden_size,
        );
        let features = ConvFeatures::new(&(&root / "features"), config.in_shape);

        let summary_size = config.rollouts_per_state() * config.hidden_size;
        let fc = nn::linear(
            &root / "fc",
            features.feature_size() + summary_size,
            config.fusion_size,
            Default::default(),
        );
        let actor = nn::linear(
            &root / "actor",
            config.fusion_size,
            config.num_actions,
            Default::default(),
        );
        let critic = nn::linear(&root / "critic", config.fusion_size, 1, Default::default());

        Ok(Self {
            vs,
            imagination,
            encoder,
            features,
            fc,
            actor,
            critic,
            num_actions: config.num_actions,
            device: config.device,
        })
    }

    pub fn imagination(&self) -> &ImaginationCore {
        &self.imagination
    }

    pub fn num_actions(&self) -> i64 {
        self.num_actions
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Imagination summary `[B, A * hidden_size]` for `[B, C, H, W]` states.
    ///
    /// Row `b` holds the encodings of state `b`'s rollouts in action order.
    pub fn summarize(&self, states: &Tensor) -> Result<Tensor> {
        let batch_size =
            ensure_batch_shape("I2A input", &self.imagination.in_shape(), &states.size())?;
        let rollout = self.imagination.imagine(states)?;
        let rollout = super::ImaginedRollout {
            states: rollout.states.to_device(self.device),
            rewards: rollout.rewards.to_device(self.device),
        };
        let hidden = self.encoder.forward(&rollout)?;
        Ok(hidden.reshape([batch_size, -1]))
    }
}

impl ActorCriticPolicy for I2A {
    fn forward(&self, states: &Tensor) -> Result<(Tensor, Tensor)> {
        let states = states.to_device(self.device);
        let summary = self.summarize(&states)?;
        let feats = self.features.forward(&states)?;

        let x = Tensor::cat(&[feats, summary], 1).apply(&self.fc).relu();
        let logits = self.actor.forward(&x);
        let value = self.critic.forward(&x);
        Ok((logits, value))
    }
}

impl HasVarStore for I2A {
    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskMode;
    use crate::imagination::ConvEnvModel;
    use crate::policy::ActorCritic;
    use crate::I2aError;
    use std::sync::Arc;
    use tch::Kind;

    fn agent(config: &I2aConfig) -> I2A {
        let env_model = Arc::new(ConvEnvModel::new(config, 7));
        let distil = Arc::new(ActorCritic::new(
            config.in_shape,
            config.num_actions,
            config.device,
        ));
        let imagination = ImaginationCore::new(config, env_model, distil).unwrap();
        I2A::new(config, imagination).unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let config = I2aConfig::new(TaskMode::Hunt, [3, 7, 7], 4).with_hidden_size(16);
        let agent = agent(&config);
        let obs = Tensor::zeros([3, 3, 7, 7], (Kind::Float, Device::Cpu));
        let (logits, value) = agent.forward(&obs).unwrap();
        assert_eq!(logits.size(), [3, 4]);
        assert_eq!(value.size(), [3, 1]);
        assert_eq!(agent.summarize(&obs).unwrap().size(), [3, 4 * 16]);
    }

    #[test]
    fn test_unbatched_input_rejected() {
        let config = I2aConfig::new(TaskMode::Hunt, [3, 5, 5], 3).with_hidden_size(8);
        let agent = agent(&config);
        let unbatched = Tensor::zeros([3, 5, 5], (Kind::Float, Device::Cpu));
        assert!(matches!(
            agent.forward(&unbatched),
            Err(I2aError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            agent.summarize(&Tensor::from(0.0f32)),
            Err(I2aError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_mismatched_imagination_rejected() {
        let config = I2aConfig::new(TaskMode::Hunt, [3, 7, 7], 4);
        let other = I2aConfig::new(TaskMode::Hunt, [3, 7, 7], 5);
        let env_model = Arc::new(ConvEnvModel::new(&other, 7));
        let distil = Arc::new(ActorCritic::new(other.in_shape, 5, Device::Cpu));
        let imagination = ImaginationCore::new(&other, env_model, distil).unwrap();
        assert!(I2A::new(&config, imagination).is_err());
    }

    #[test]
    fn test_forward_does_not_touch_imagination_models() {
        let config = I2aConfig::new(TaskMode::Rush, [3, 7, 7], 3).with_hidden_size(8);
        let env_model = Arc::new(ConvEnvModel::new(&config, 7));
        let distil = Arc::new(ActorCritic::new(config.in_shape, 3, Device::Cpu));
        let imagination =
            ImaginationCore::new(&config, env_model.clone(), distil.clone()).unwrap();
        let agent = I2A::new(&config, imagination).unwrap();

        let obs = Tensor::zeros([2, 3, 7, 7], (Kind::Float, Device::Cpu));
        let (logits, value) = agent.forward(&obs).unwrap();
        (logits.sum(Kind::Float) + value.sum(Kind::Float)).backward();

        for var in env_model.var_store().trainable_variables() {
            assert!(!var.grad().defined());
        }
        for var in distil.var_store().trainable_variables() {
            assert!(!var.grad().defined());
        }
        let encoder_grads = agent
            .var_store()
            .variables()
            .iter()
            .filter(|(name, _)| name.starts_with("encoder"))
            .any(|(_, var)| var.grad().defined());
        assert!(encoder_grads);
    }
}
