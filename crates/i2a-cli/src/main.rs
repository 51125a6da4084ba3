//! I2A CLI
//!
//! Command-line interface for inspecting I2A configurations, networks and
//! imagined rollouts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use i2a::prelude::*;
use tch::{Device, Kind, Tensor};

#[derive(Parser)]
#[command(name = "i2a")]
#[command(version, about = "I2A - Imagination-Augmented Agents in Rust", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Debug)]
struct ModelArgs {
    /// Task mode (regular, avoid, hunt, ambush, rush)
    #[arg(long, default_value = "regular")]
    mode: TaskMode,

    /// Observation height
    #[arg(long, default_value = "15")]
    height: i64,

    /// Observation width
    #[arg(long, default_value = "19")]
    width: i64,

    /// Number of discrete actions
    #[arg(long, default_value = "5")]
    actions: i64,

    /// Imagined steps per rollout
    #[arg(long, default_value = "1")]
    depth: usize,

    /// Rollout encoder hidden size
    #[arg(long, default_value = "256")]
    hidden: i64,

    /// Read the agent configuration from a JSON file instead of the flags above
    #[arg(long)]
    config: Option<PathBuf>,
}

impl ModelArgs {
    fn to_config(&self) -> Result<I2aConfig> {
        let config = match &self.config {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("Failed to open config {}", path.display()))?;
                serde_json::from_reader(file)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => I2aConfig::new(self.mode, [3, self.height, self.width], self.actions)
                .with_rollout_depth(self.depth)
                .with_hidden_size(self.hidden),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List task modes and their reward tables
    Modes,

    /// Print default agent and trainer configuration as JSON
    Config {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Build the networks and report their sizes
    Inspect {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Imagine rollouts from random palette observations
    Imagine {
        #[command(flatten)]
        model: ModelArgs,

        /// Number of real states to imagine from
        #[arg(long, default_value = "2")]
        batch: i64,

        /// Directory holding `env_model_{mode}.ot` (and optionally `distil_{mode}.ot`)
        #[arg(long, default_value = "checkpoints")]
        checkpoint_dir: PathBuf,

        /// Use a randomly initialised environment model instead of a checkpoint
        #[arg(long)]
        untrained: bool,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Modes => list_modes(),
        Commands::Config { model } => print_config(&model)?,
        Commands::Inspect { model } => inspect(&model)?,
        Commands::Imagine {
            model,
            batch,
            checkpoint_dir,
            untrained,
            seed,
        } => imagine(&model, batch, checkpoint_dir, untrained, seed)?,
    }

    Ok(())
}

fn list_modes() {
    println!("Available task modes:");
    println!();
    for mode in TaskMode::ALL {
        let rewards: Vec<String> = mode.rewards().iter().map(|r| r.to_string()).collect();
        println!("  {:<8} rewards [{}]", mode.name(), rewards.join(", "));
    }
}

fn print_config(model: &ModelArgs) -> Result<()> {
    let config = model.to_config()?;
    let output = serde_json::json!({
        "agent": config,
        "trainer": TrainerConfig::default(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn inspect(model: &ModelArgs) -> Result<()> {
    let config = model.to_config()?;
    let env_model = Arc::new(ConvEnvModel::new(&config, Palette::minipacman().len() as i64));
    let distil = Arc::new(ActorCritic::new(
        config.in_shape,
        config.num_actions,
        config.device,
    ));
    let env_params = env_model.num_parameters();
    let distil_params = distil.num_parameters();

    let imagination = ImaginationCore::new(&config, env_model, distil)?;
    let agent = I2A::new(&config, imagination)?;

    println!("Task mode:          {}", config.mode);
    println!("Observation shape:  {:?}", config.in_shape);
    println!("Actions:            {}", config.num_actions);
    println!("Reward categories:  {}", config.num_rewards());
    println!("Rollout depth:      {}", config.rollout_depth);
    println!(
        "Imagination size:   {} x {}",
        config.rollouts_per_state(),
        config.hidden_size
    );
    println!("Environment model:  {} parameters", env_params);
    println!("Distil policy:      {} parameters", distil_params);
    println!("I2A network:        {} parameters", agent.num_parameters());
    Ok(())
}

fn imagine(
    model: &ModelArgs,
    batch: i64,
    checkpoint_dir: PathBuf,
    untrained: bool,
    seed: u64,
) -> Result<()> {
    anyhow::ensure!(batch > 0, "--batch must be positive");
    let config = model.to_config()?;
    i2a::utils::set_seed(seed);

    let palette = Palette::minipacman();
    let mut env_model = ConvEnvModel::new(&config, palette.len() as i64);
    let mut distil = ActorCritic::new(config.in_shape, config.num_actions, config.device);

    if untrained {
        tracing::warn!("Using an untrained environment model");
    } else {
        let manager = CheckpointManager::new(CheckpointConfig::new(checkpoint_dir));
        manager
            .load(&mut env_model, ModelKind::EnvModel, config.mode, None)
            .context("An environment model checkpoint is required (or pass --untrained)")?;
        match manager.load(&mut distil, ModelKind::Distil, config.mode, None) {
            Ok(_) => {}
            Err(I2aError::MissingCheckpoint { .. }) => {
                tracing::warn!("No distillation policy checkpoint, using random weights")
            }
            Err(e) => return Err(e.into()),
        }
    }

    let imagination = ImaginationCore::new(&config, Arc::new(env_model), Arc::new(distil))?;

    let [_, h, w] = config.in_shape;
    let targets = Tensor::randint(
        palette.len() as i64,
        [batch * h * w],
        (Kind::Int64, Device::Cpu),
    );
    let states = palette
        .targets_to_observation(&targets, h, w)?
        .to_device(config.device);

    let rollout = imagination.imagine(&states)?;
    let rewards = RewardTable::new(config.mode);
    let categories = rollout.rewards.argmax(-1, false).to_device(Device::Cpu);

    let mut steps = Vec::with_capacity(config.rollout_depth);
    for t in 0..rollout.depth() {
        let step_categories = Vec::<i64>::try_from(categories.get(t))?;
        steps.push(rewards.decode_rewards(&step_categories)?);
    }

    let output = serde_json::json!({
        "mode": config.mode,
        "batch": batch,
        "actions": config.num_actions,
        "states_shape": rollout.states.size(),
        "rewards_shape": rollout.rewards.size(),
        "imagined_rewards": steps,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
