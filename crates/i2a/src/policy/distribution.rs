//! Probability distributions for RL policies.

use tch::{Kind, Tensor};

/// Enum for different types of probability distributions
pub enum Distribution {
    Categorical { logits: Tensor },
}

impl Distribution {
    /// Sample raw actions from the distribution
    pub fn sample(&self) -> Tensor {
        match self {
            Distribution::Categorical { logits } => logits
                .softmax(-1, Kind::Float)
                .multinomial(1, true)
                .squeeze_dim(-1),
        }
    }

    /// Most likely action
    pub fn mode(&self) -> Tensor {
        match self {
            Distribution::Categorical { logits } => logits.argmax(-1, false),
        }
    }

    /// Compute log probabilities for given actions
    pub fn log_prob(&self, actions: &Tensor) -> Tensor {
        match self {
            Distribution::Categorical { logits } => {
                let log_probs = logits.log_softmax(-1, Kind::Float);
                let indices = if actions.dim() == log_probs.dim() {
                    actions.to_kind(Kind::Int64)
                } else {
                    actions.unsqueeze(-1).to_kind(Kind::Int64)
                };
                log_probs.gather(-1, &indices, false).squeeze_dim(-1)
            }
        }
    }

    /// Compute entropy of the distribution
    pub fn entropy(&self) -> Tensor {
        match self {
            Self::Categorical { logits } => {
                let probs = logits.softmax(-1, Kind::Float);
                let log_probs = logits.log_softmax(-1, Kind::Float);
                -(probs * log_probs).sum_dim_intlist(Some(&[-1_i64][..]), false, Kind::Float)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorical_sample() {
        let logits = Tensor::from_slice(&[1.0f32, 2.0, 10.0]).reshape([1, 3]);
        let dist = Distribution::Categorical { logits };
        let sample = dist.sample();
        let val = sample.get(0).int64_value(&[]);
        assert!((0..=2).contains(&val));
    }

    #[test]
    fn test_categorical_mode() {
        let logits = Tensor::from_slice(&[1.0f32, 5.0, 2.0, 0.5, 0.1, 3.0]).reshape([2, 3]);
        let dist = Distribution::Categorical { logits };
        assert_eq!(Vec::<i64>::try_from(&dist.mode()).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_categorical_log_prob_accepts_column_actions() {
        let logits = Tensor::zeros([2, 4], (Kind::Float, tch::Device::Cpu));
        let dist = Distribution::Categorical { logits };
        let flat = dist.log_prob(&Tensor::from_slice(&[0i64, 3]));
        let column = dist.log_prob(&Tensor::from_slice(&[0i64, 3]).reshape([2, 1]));
        assert_eq!(flat.size(), [2]);
        assert!(flat.allclose(&column, 1e-6, 1e-6, false));
        let expected = -(4.0f64).ln();
        assert!((flat.get(0).double_value(&[]) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_uniform_entropy() {
        let logits = Tensor::zeros([1, 5], (Kind::Float, tch::Device::Cpu));
        let dist = Distribution::Categorical { logits };
        let val = dist.entropy().get(0).double_value(&[]);
        assert!((val - (5.0f64).ln()).abs() < 1e-5);
    }
}
