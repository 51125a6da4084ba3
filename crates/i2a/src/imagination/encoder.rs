use super::core::ImaginedRollout;
use crate::policy::ConvFeatures;
use crate::{ensure_shape, I2aError, Result};
use tch::{nn, nn::RNN, Tensor};

/// Summarises each imagined rollout into one hidden vector.
///
/// Every imagined frame goes through the conv feature extractor on its own;
/// time is only modelled by the GRU that consumes `[features, reward one-hot]`
/// step by step in rollout order.
pub struct RolloutEncoder {
    features: ConvFeatures,
    gru: nn::GRU,
    in_shape: [i64; 3],
    num_rewards: i64,
    hidden_size: i64,
}

impl RolloutEncoder {
    pub fn new(p: &nn::Path, in_shape: [i64; 3], num_rewards: i64, hidden_size: i64) -> Self {
        let features = ConvFeatures::new(&(p / "features"), in_shape);
        let gru = nn::gru(
            p / "gru",
            features.feature_size() + num_rewards,
            hidden_size,
            nn::RNNConfig {
                batch_first: true,
                ..Default::default()
            },
        );

        Self {
            features,
            gru,
            in_shape,
            num_rewards,
            hidden_size,
        }
    }

    pub fn hidden_size(&self) -> i64 {
        self.hidden_size
    }

    /// Encode an imagined rollout into `[N, hidden_size]`.
    pub fn forward(&self, rollout: &ImaginedRollout) -> Result<Tensor> {
        self.encode(&rollout.states, &rollout.rewards)
    }

    /// `states` `[T, N, C, H, W]` and `rewards` `[T, N, R]` -> `[N, hidden_size]`
    pub fn encode(&self, states: &Tensor, rewards: &Tensor) -> Result<Tensor> {
        let size = states.size();
        if size.len() != 5 {
            return Err(I2aError::ShapeMismatch {
                context: "rollout encoder states",
                expected: vec![-1, -1, self.in_shape[0], self.in_shape[1], self.in_shape[2]],
                actual: size,
            });
        }
        let (num_steps, batch_size) = (size[0], size[1]);
        ensure_shape("rollout encoder states", &self.in_shape, &size[2..])?;
        ensure_shape(
            "rollout encoder rewards",
            &[num_steps, batch_size, self.num_rewards],
            &rewards.size(),
        )?;

        let [c, h, w] = self.in_shape;
        let feats = self
            .features
            .forward(&states.reshape([-1, c, h, w]))?
            .reshape([num_steps, batch_size, -1]);
        let rnn_input = Tensor::cat(&[feats, rewards.to_device(states.device())], 2);

        let mut state = self.gru.zero_state(batch_size);
        for t in 0..num_steps {
            state = self.gru.step(&rnn_input.get(t), &state);
        }
        Ok(state.0.squeeze_dim(0))
    }
}
