//! A2C trainer for the I2A network with online policy distillation.

use super::a2c::{a2c_loss, action_loss, clip_grad_norm, distillation_loss, value_loss};
use super::storage::RolloutStorage;
use crate::checkpoint::{CheckpointConfig, CheckpointManager, ModelKind};
use crate::config::{TaskMode, TrainerConfig};
use crate::env::{check_step, EpisodeTracker, VecEnv};
use crate::imagination::I2A;
use crate::log::{MetricLogger, NoOpLogger};
use crate::policy::{ActorCritic, ActorCriticPolicy, HasVarStore};
use crate::utils::{abbreviate, format_duration, set_seed};
use crate::{ensure_shape, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tch::{nn, nn::OptimizerConfig};

/// Losses and episode statistics from one update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateStats {
    /// 1-based update counter
    pub update: u64,
    pub loss: f64,
    pub value_loss: f64,
    pub action_loss: f64,
    pub entropy: f64,
    pub distil_loss: f64,
    /// Gradient norm of the I2A network before clipping
    pub grad_norm: f64,
    /// Mean return of the most recently finished episode of each environment
    pub mean_final_return: f64,
}

impl UpdateStats {
    fn to_metrics(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("loss".to_string(), self.loss),
            ("value_loss".to_string(), self.value_loss),
            ("action_loss".to_string(), self.action_loss),
            ("entropy".to_string(), self.entropy),
            ("distil_loss".to_string(), self.distil_loss),
            ("grad_norm".to_string(), self.grad_norm),
            ("final_return".to_string(), self.mean_final_return),
        ])
    }
}

/// Trains an `I2A` agent with A2C while distilling it into the actor-critic
/// that drives imagined rollouts.
///
/// The distillation policy is shared with the agent's imagination core.
/// Its parameters only change inside `update`, between forward passes.
pub struct Trainer<V: VecEnv> {
    config: TrainerConfig,
    mode: TaskMode,
    env: V,
    agent: I2A,
    distil: Arc<ActorCritic>,
    optimizer: nn::Optimizer,
    distil_optimizer: nn::Optimizer,
    storage: RolloutStorage,
    episodes: EpisodeTracker,
    /// Mean final returns of the last few updates, for the progress bar
    recent_returns: VecDeque<f64>,
    logger: Box<dyn MetricLogger>,
    checkpoints: Option<CheckpointManager>,
    update: u64,
    start_time: Instant,
}

impl<V: VecEnv> Trainer<V> {
    const RECENT_WINDOW: usize = 10;

    /// Create a trainer and reset the environments.
    pub fn new(
        mut env: V,
        agent: I2A,
        distil: Arc<ActorCritic>,
        mode: TaskMode,
        config: TrainerConfig,
    ) -> Result<Self> {
        config.validate()?;
        set_seed(config.seed);

        let shape = env.observation_shape();
        ensure_shape(
            "environment vs agent",
            &[shape[0], shape[1], shape[2], env.num_actions()],
            &[
                agent.imagination().in_shape()[0],
                agent.imagination().in_shape()[1],
                agent.imagination().in_shape()[2],
                agent.num_actions(),
            ],
        )?;

        let optimizer = nn::RmsProp {
            alpha: config.rms_alpha,
            eps: config.rms_eps,
            ..Default::default()
        }
        .build(agent.var_store(), config.learning_rate)?;
        let distil_optimizer =
            nn::Adam::default().build(distil.var_store(), config.distil_learning_rate)?;

        let num_envs = env.num_envs();
        let mut storage = RolloutStorage::new(config.num_steps, num_envs, shape, agent.device());
        let states = env.reset(Some(config.seed))?;
        storage.set_initial_state(&states)?;

        tracing::info!(
            %mode,
            num_envs,
            agent_params = %abbreviate(agent.num_parameters() as u64),
            distil_params = %abbreviate(distil.num_parameters() as u64),
            "Trainer initialized"
        );

        Ok(Self {
            config,
            mode,
            env,
            agent,
            distil,
            optimizer,
            distil_optimizer,
            storage,
            episodes: EpisodeTracker::new(num_envs),
            recent_returns: VecDeque::with_capacity(Self::RECENT_WINDOW),
            logger: Box::new(NoOpLogger),
            checkpoints: None,
            update: 0,
            start_time: Instant::now(),
        })
    }

    /// Send metrics to `logger` every `log_interval` updates.
    pub fn with_logger(mut self, logger: Box<dyn MetricLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Save checkpoints every `checkpoint_interval` updates, plus final
    /// weights when `train` returns.
    pub fn with_checkpoints(mut self, config: CheckpointConfig) -> Self {
        let config = config.save_every(self.config.checkpoint_interval);
        self.checkpoints = Some(CheckpointManager::new(config));
        self
    }

    pub fn agent(&self) -> &I2A {
        &self.agent
    }

    pub fn distil_policy(&self) -> &Arc<ActorCritic> {
        &self.distil
    }

    pub fn env(&self) -> &V {
        &self.env
    }

    /// Number of updates performed so far
    pub fn updates(&self) -> u64 {
        self.update
    }

    pub fn episodes(&self) -> &EpisodeTracker {
        &self.episodes
    }

    /// Collect `num_steps` transitions and perform one A2C + distillation update.
    pub fn update(&mut self) -> Result<UpdateStats> {
        self.collect_rollout()?;

        let last = self.storage.state(self.storage.num_steps());
        let (_, next_value) = tch::no_grad(|| self.agent.forward(&last))?;
        let returns = self
            .storage
            .compute_returns(&next_value, self.config.gamma)
            .reshape([-1, 1]);

        let states = self.storage.flat_states();
        let actions = self.storage.flat_actions();

        let eval = self.agent.evaluate_actions(&states, &actions)?;
        let (distil_logits, _) = self.distil.forward(&states)?;

        let advantages = returns - &eval.values;
        let value_loss = value_loss(&advantages);
        let action_loss = action_loss(&advantages, &eval.log_probs);
        let loss = a2c_loss(
            &value_loss,
            &action_loss,
            &eval.entropy,
            self.config.value_loss_coef,
            self.config.entropy_coef,
        );
        let distil_loss = distillation_loss(&eval.logits, &distil_logits, self.config.distil_coef);

        self.optimizer.zero_grad();
        loss.backward();
        let grad_norm = clip_grad_norm(self.agent.var_store(), self.config.max_grad_norm);
        self.optimizer.step();

        self.distil_optimizer.zero_grad();
        distil_loss.backward();
        self.distil_optimizer.step();

        self.storage.after_update();
        self.update += 1;

        let stats = UpdateStats {
            update: self.update,
            loss: loss.double_value(&[]),
            value_loss: value_loss.double_value(&[]),
            action_loss: action_loss.double_value(&[]),
            entropy: eval.entropy.double_value(&[]),
            distil_loss: distil_loss.double_value(&[]),
            grad_norm,
            mean_final_return: self.episodes.mean_final_return(),
        };

        if self.recent_returns.len() == Self::RECENT_WINDOW {
            self.recent_returns.pop_front();
        }
        self.recent_returns.push_back(stats.mean_final_return);

        tracing::debug!(
            update = stats.update,
            loss = stats.loss,
            distil_loss = stats.distil_loss,
            "Update complete"
        );

        if self.config.log_interval > 0 && self.update % self.config.log_interval == 0 {
            self.logger.log_metrics(&stats.to_metrics(), self.update);
        }

        Ok(stats)
    }

    /// Run `num_updates` updates, saving checkpoints along the way and final
    /// weights at the end.
    pub fn train(&mut self) -> Result<Vec<UpdateStats>> {
        let progress = ProgressBar::new(self.config.num_updates);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            progress.set_style(style.progress_chars("#>-"));
        }

        let mut history = Vec::with_capacity(self.config.num_updates as usize);
        while self.update < self.config.num_updates {
            let stats = self.update()?;

            progress.set_position(self.update);
            progress.set_message(format!(
                "Loss: {:.4} Reward: {:.2}",
                stats.loss,
                self.recent_mean_return()
            ));

            if let Some(manager) = &self.checkpoints {
                manager.maybe_save(&self.agent, ModelKind::I2a, self.mode, self.update)?;
                manager.maybe_save(&*self.distil, ModelKind::Distil, self.mode, self.update)?;
            }

            history.push(stats);
        }
        progress.finish_with_message("Training complete");

        if let Some(manager) = &self.checkpoints {
            manager.save(&self.agent, ModelKind::I2a, self.mode, None)?;
            manager.save(&*self.distil, ModelKind::Distil, self.mode, None)?;
        }
        self.logger.close();

        tracing::info!(
            updates = self.update,
            episodes = self.episodes.episodes(),
            elapsed = %format_duration(self.start_time.elapsed().as_secs_f64()),
            "Training finished"
        );
        Ok(history)
    }

    /// Mean of the final returns reported by the last few updates
    pub fn recent_mean_return(&self) -> f64 {
        if self.recent_returns.is_empty() {
            return 0.0;
        }
        self.recent_returns.iter().sum::<f64>() / self.recent_returns.len() as f64
    }

    fn collect_rollout(&mut self) -> Result<()> {
        for step in 0..self.storage.num_steps() {
            let state = self.storage.state(step);
            let actions = tch::no_grad(|| self.agent.sample_action(&state))?;

            let result = self.env.step(&actions.to_device(tch::Device::Cpu))?;
            check_step(&self.env, &result)?;
            self.episodes.record(&result.rewards, &result.dones);

            self.storage.insert(
                step,
                &result.states,
                &actions,
                &result.rewards,
                &result.masks(),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::I2aConfig;
    use crate::env::VecStep;
    use crate::checkpoint::CheckpointConfig;
    use crate::imagination::{ConvEnvModel, ImaginationCore};
    use std::sync::Mutex;
    use tch::{Device, Kind, Tensor};
    use tempfile::tempdir;

    /// Every environment shows a blank board, pays `1.0` for action 0 and
    /// ends its episode every `episode_len` steps.
    struct CorridorEnv {
        num_envs: usize,
        shape: [i64; 3],
        episode_len: usize,
        t: usize,
    }

    impl CorridorEnv {
        fn new(num_envs: usize) -> Self {
            Self {
                num_envs,
                shape: [3, 7, 7],
                episode_len: 3,
                t: 0,
            }
        }

        fn blank(&self) -> Tensor {
            let [c, h, w] = self.shape;
            Tensor::zeros([self.num_envs as i64, c, h, w], (Kind::Float, Device::Cpu))
        }
    }

    impl VecEnv for CorridorEnv {
        fn num_envs(&self) -> usize {
            self.num_envs
        }

        fn observation_shape(&self) -> [i64; 3] {
            self.shape
        }

        fn num_actions(&self) -> i64 {
            3
        }

        fn reset(&mut self, _seed: Option<u64>) -> Result<Tensor> {
            self.t = 0;
            Ok(self.blank())
        }

        fn step(&mut self, actions: &Tensor) -> Result<VecStep> {
            self.t += 1;
            let actions = Vec::<i64>::try_from(actions)?;
            let rewards = actions
                .iter()
                .map(|&a| if a == 0 { 1.0 } else { 0.0 })
                .collect();
            let done = self.t % self.episode_len == 0;
            Ok(VecStep {
                states: self.blank(),
                rewards,
                dones: vec![done; self.num_envs],
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingLogger {
        steps: Arc<Mutex<Vec<u64>>>,
    }

    impl MetricLogger for RecordingLogger {
        fn log_scalar(&self, _name: &str, _value: f64, step: u64) {
            self.steps.lock().unwrap().push(step);
        }

        fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64) {
            assert!(metrics.contains_key("distil_loss"));
            self.steps.lock().unwrap().push(step);
        }
    }

    fn trainer(config: TrainerConfig) -> Trainer<CorridorEnv> {
        let agent_config = I2aConfig::new(TaskMode::Rush, [3, 7, 7], 3).with_hidden_size(16);
        let env_model = Arc::new(ConvEnvModel::new(&agent_config, 7));
        let distil = Arc::new(ActorCritic::new([3, 7, 7], 3, Device::Cpu));
        let imagination =
            ImaginationCore::new(&agent_config, env_model, distil.clone()).unwrap();
        let agent = I2A::new(&agent_config, imagination).unwrap();
        Trainer::new(CorridorEnv::new(2), agent, distil, TaskMode::Rush, config).unwrap()
    }

    #[test]
    fn test_update_reports_finite_losses() {
        let mut trainer = trainer(TrainerConfig::default().with_num_steps(3));
        let stats = trainer.update().unwrap();

        assert_eq!(stats.update, 1);
        for value in [stats.loss, stats.value_loss, stats.action_loss, stats.distil_loss] {
            assert!(value.is_finite());
        }
        assert!(stats.entropy > 0.0);
        // Both environments finish an episode on the third step
        assert_eq!(trainer.episodes().episodes(), 2);
    }

    #[test]
    fn test_update_moves_distillation_policy() {
        let mut trainer = trainer(TrainerConfig::default().with_num_steps(2));
        let before: Vec<Tensor> = trainer
            .distil_policy()
            .var_store()
            .trainable_variables()
            .iter()
            .map(|t| t.detach().copy())
            .collect();

        trainer.update().unwrap();

        let after = trainer.distil_policy().var_store().trainable_variables();
        let changed = before
            .iter()
            .zip(after.iter())
            .any(|(b, a)| !b.allclose(a, 1e-9, 1e-9, false));
        assert!(changed);
    }

    #[test]
    fn test_distillation_loss_decreases_toward_fixed_target() {
        let mut trainer = trainer(TrainerConfig::default().with_num_steps(2));
        let states = Tensor::zeros([4, 3, 7, 7], (Kind::Float, Device::Cpu));
        let target = Tensor::from_slice(&[5.0f32, 0.0, 0.0]).reshape([1, 3]).repeat([4, 1]);

        let loss_of = |trainer: &Trainer<CorridorEnv>| {
            let (logits, _) = trainer.distil_policy().forward(&states).unwrap();
            distillation_loss(&target, &logits, 1.0)
        };

        let first = loss_of(&trainer);
        let initial = first.double_value(&[]);
        trainer.distil_optimizer.zero_grad();
        first.backward();
        trainer.distil_optimizer.step();

        assert!(loss_of(&trainer).double_value(&[]) < initial);
    }

    #[test]
    fn test_train_logs_and_checkpoints() {
        let dir = tempdir().unwrap();
        let logger = RecordingLogger::default();
        let config = TrainerConfig {
            num_steps: 2,
            num_updates: 4,
            checkpoint_interval: 2,
            log_interval: 2,
            ..Default::default()
        };
        let mut trainer = trainer(config)
            .with_logger(Box::new(logger.clone()))
            .with_checkpoints(CheckpointConfig::new(dir.path()));
        let history = trainer.train().unwrap();

        assert_eq!(history.len(), 4);
        assert_eq!(*logger.steps.lock().unwrap(), vec![2, 4]);
        for name in [
            "i2a_rush_2.ot",
            "i2a_rush_4.ot",
            "distil_rush_4.ot",
            "i2a_rush.ot",
            "distil_rush.ot",
        ] {
            assert!(dir.path().join(name).exists(), "missing {}", name);
        }
    }

    #[test]
    fn test_rejects_mismatched_environment() {
        let agent_config = I2aConfig::new(TaskMode::Rush, [3, 7, 7], 4).with_hidden_size(8);
        let env_model = Arc::new(ConvEnvModel::new(&agent_config, 7));
        let distil = Arc::new(ActorCritic::new([3, 7, 7], 4, Device::Cpu));
        let imagination =
            ImaginationCore::new(&agent_config, env_model, distil.clone()).unwrap();
        let agent = I2A::new(&agent_config, imagination).unwrap();

        let result = Trainer::new(
            CorridorEnv::new(2),
            agent,
            distil,
            TaskMode::Rush,
            TrainerConfig::default(),
        );
        assert!(result.is_err());
    }
}
