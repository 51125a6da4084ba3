use super::{ActorCriticPolicy, DistillPolicy, HasVarStore};
use crate::{ensure_batch_shape, Result};
use tch::{nn, nn::Module, Device, Tensor};

/// Small convolutional feature extractor shared by the actor-critic, the
/// rollout encoder and the I2A network:
/// 3x3 conv (stride 1) -> ReLU -> 3x3 conv (stride 2) -> ReLU -> Flatten
#[derive(Debug)]
pub struct ConvFeatures {
    seq: nn::Sequential,
    in_shape: [i64; 3],
    feature_size: i64,
}

impl ConvFeatures {
    pub const CHANNELS: i64 = 16;

    pub fn new(p: &nn::Path, in_shape: [i64; 3]) -> Self {
        let [channels, height, width] = in_shape;
        let seq = nn::seq()
            .add(nn::conv2d(
                p / "c1",
                channels,
                Self::CHANNELS,
                3,
                nn::ConvConfig {
                    stride: 1,
                    ..Default::default()
                },
            ))
            .add_fn(|x| x.relu())
            .add(nn::conv2d(
                p / "c2",
                Self::CHANNELS,
                Self::CHANNELS,
                3,
                nn::ConvConfig {
                    stride: 2,
                    ..Default::default()
                },
            ))
            .add_fn(|x| x.relu())
            .add_fn(|x| x.flatten(1, -1));

        Self {
            seq,
            in_shape,
            feature_size: Self::output_size(height, width),
        }
    }

    /// Flattened feature size for an `height x width` input.
    pub fn output_size(height: i64, width: i64) -> i64 {
        let calc_conv = |size, kernel, stride| (size - kernel) / stride + 1;
        let h = calc_conv(calc_conv(height, 3, 1), 3, 2);
        let w = calc_conv(calc_conv(width, 3, 1), 3, 2);
        Self::CHANNELS * h * w
    }

    pub fn feature_size(&self) -> i64 {
        self.feature_size
    }

    /// `[N, C, H, W]` -> `[N, feature_size]`
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        ensure_batch_shape("conv features input", &self.in_shape, &xs.size())?;
        Ok(self.seq.forward(xs))
    }
}

/// Convolutional actor-critic.
///
/// Trained toward the I2A policy by distillation and used to pick actions
/// inside imagined rollouts.
pub struct ActorCritic {
    vs: nn::VarStore,
    features: ConvFeatures,
    fc: nn::Linear,
    actor: nn::Linear,
    critic: nn::Linear,
    device: Device,
}

impl ActorCritic {
    pub const HIDDEN: i64 = 256;

    pub fn new(in_shape: [i64; 3], num_actions: i64, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();

        let features = ConvFeatures::new(&(&root / "features"), in_shape);
        let fc = nn::linear(
            &root / "fc",
            features.feature_size(),
            Self::HIDDEN,
            Default::default(),
        );
        let actor = nn::linear(&root / "actor", Self::HIDDEN, num_actions, Default::default());
        let critic = nn::linear(&root / "critic", Self::HIDDEN, 1, Default::default());

        Self {
            vs,
            features,
            fc,
            actor,
            critic,
            device,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

impl ActorCriticPolicy for ActorCritic {
    fn forward(&self, states: &Tensor) -> Result<(Tensor, Tensor)> {
        let x = states.to_device(self.device);
        let feats = self.features.forward(&x)?.apply(&self.fc).relu();

        let logits = self.actor.forward(&feats);
        let value = self.critic.forward(&feats);
        Ok((logits, value))
    }
}

impl DistillPolicy for ActorCritic {
    /// Greedy action of the distilled policy.
    fn act(&self, states: &Tensor) -> Result<Tensor> {
        let (logits, _) = ActorCriticPolicy::forward(self, states)?;
        Ok(super::Distribution::Categorical { logits }.mode())
    }
}

impl HasVarStore for ActorCritic {
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
    use tch::Kind;

    #[test]
    fn test_feature_size_matches_forward() {
        let vs = nn::VarStore::new(Device::Cpu);
        for (h, w) in [(15, 19), (7, 7), (5, 9)] {
            let features = ConvFeatures::new(&(vs.root() / format!("f{}x{}", h, w)), [3, h, w]);
            let out = features
                .forward(&Tensor::zeros([2, 3, h, w], (Kind::Float, Device::Cpu)))
                .unwrap();
            assert_eq!(out.size(), [2, features.feature_size()]);
        }
        assert_eq!(ConvFeatures::output_size(15, 19), 16 * 6 * 8);
    }

    #[test]
    fn test_conv_features_reject_wrong_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let features = ConvFeatures::new(&vs.root(), [3, 7, 7]);
        let wrong = Tensor::zeros([2, 3, 8, 7], (Kind::Float, Device::Cpu));
        assert!(features.forward(&wrong).is_err());
        let unbatched = Tensor::zeros([3, 7, 7], (Kind::Float, Device::Cpu));
        assert!(matches!(
            features.forward(&unbatched),
            Err(crate::I2aError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_actor_critic_forward() {
        let policy = ActorCritic::new([3, 7, 7], 5, Device::Cpu);
        let obs = Tensor::rand([4, 3, 7, 7], (Kind::Float, Device::Cpu));
        let (logits, value) = ActorCriticPolicy::forward(&policy, &obs).unwrap();
        assert_eq!(logits.size(), [4, 5]);
        assert_eq!(value.size(), [4, 1]);
        assert!(policy.num_parameters() > 0);
    }

    #[test]
    fn test_distill_act_is_greedy_and_deterministic() {
        let policy = ActorCritic::new([3, 7, 7], 5, Device::Cpu);
        let obs = Tensor::rand([6, 3, 7, 7], (Kind::Float, Device::Cpu));
        let a = policy.act(&obs).unwrap();
        let b = policy.act(&obs).unwrap();
        assert_eq!(a.size(), [6]);
        assert_eq!(a.kind(), Kind::Int64);
        assert!(a.equal(&b));

        let (logits, _) = ActorCriticPolicy::forward(&policy, &obs).unwrap();
        assert!(a.equal(&logits.argmax(-1, false)));
    }

    #[test]
    fn test_evaluate_actions_shapes() {
        let policy = ActorCritic::new([3, 7, 7], 3, Device::Cpu);
        let obs = Tensor::rand([4, 3, 7, 7], (Kind::Float, Device::Cpu));
        let actions = policy.sample_action(&obs).unwrap();
        let eval = policy.evaluate_actions(&obs, &actions).unwrap();
        assert_eq!(eval.logits.size(), [4, 3]);
        assert_eq!(eval.log_probs.size(), [4, 1]);
        assert_eq!(eval.values.size(), [4, 1]);
        assert_eq!(eval.entropy.size(), Vec::<i64>::new());
    }
}
