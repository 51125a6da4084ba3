//! A2C and policy-distillation loss functions.

use tch::{nn, Kind, Tensor};

/// Mean squared advantage.
pub fn value_loss(advantages: &Tensor) -> Tensor {
    advantages.pow_tensor_scalar(2).mean(Kind::Float)
}

/// Policy-gradient loss. Advantages are treated as constants.
pub fn action_loss(advantages: &Tensor, log_probs: &Tensor) -> Tensor {
    -(advantages.detach() * log_probs).mean(Kind::Float)
}

/// Combined actor-critic objective.
pub fn a2c_loss(
    value_loss: &Tensor,
    action_loss: &Tensor,
    entropy: &Tensor,
    value_loss_coef: f64,
    entropy_coef: f64,
) -> Tensor {
    value_loss * value_loss_coef + action_loss - entropy * entropy_coef
}

/// Cross-entropy from the (fixed) agent policy to the distillation policy,
/// scaled by `coef`. Minimising it moves the distillation policy toward the
/// agent; no gradient reaches the agent.
pub fn distillation_loss(agent_logits: &Tensor, distil_logits: &Tensor, coef: f64) -> Tensor {
    let target = agent_logits.softmax(1, Kind::Float).detach();
    let log_q = distil_logits.log_softmax(1, Kind::Float);
    -(target * log_q)
        .sum_dim_intlist(Some(&[1_i64][..]), false, Kind::Float)
        .mean(Kind::Float) * coef
}

/// Scale gradients in `vs` so their global L2 norm is at most `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(vs: &nn::VarStore, max_norm: f64) -> f64 {
    let mut global_norm = 0.0f64;
    for var in vs.trainable_variables() {
        let grad = var.grad();
        if grad.defined() {
            global_norm += grad
                .pow_tensor_scalar(2.0)
                .sum(Kind::Float)
                .double_value(&[]);
        }
    }
    global_norm = global_norm.sqrt();

    if global_norm > max_norm {
        let clip_coef = max_norm / (global_norm + 1e-6);
        for var in vs.trainable_variables() {
            let mut grad = var.grad();
            if grad.defined() {
                let _ = grad.f_mul_scalar_(clip_coef);
            }
        }
    }

    global_norm
}
