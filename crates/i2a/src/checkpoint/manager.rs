//! Checkpoint manager keyed by model kind, task mode and iteration.

use crate::config::TaskMode;
use crate::policy::HasVarStore;
use crate::{I2aError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// The three independently persisted networks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelKind {
    EnvModel,
    I2a,
    Distil,
}

impl ModelKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ModelKind::EnvModel => "env_model",
            ModelKind::I2a => "i2a",
            ModelKind::Distil => "distil",
        }
    }
}

/// Configuration for checkpoint management.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    /// Directory to store checkpoints
    pub checkpoint_dir: PathBuf,
    /// Save a periodic checkpoint every N updates
    pub save_every: u64,
    /// Keep only the last N periodic checkpoints per model (0 = keep all)
    pub keep_last: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            save_every: 10_000,
            keep_last: 0,
        }
    }
}

impl CheckpointConfig {
    /// Create a new config with the given directory.
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    /// Set save frequency.
    pub fn save_every(mut self, updates: u64) -> Self {
        self.save_every = updates;
        self
    }

    /// Set number of periodic checkpoints to keep.
    pub fn keep_last(mut self, n: usize) -> Self {
        self.keep_last = n;
        self
    }
}

/// Manages checkpoint files for the environment model, the I2A network and
/// the distillation policy.
///
/// File names follow `{kind}_{mode}` for final weights and
/// `{kind}_{mode}_{iteration}` for periodic ones, with an `.ot` extension.
///
/// # Example
///
/// ```ignore
/// let manager = CheckpointManager::new(CheckpointConfig::new("./checkpoints").save_every(100));
///
/// manager.load(&mut env_model, ModelKind::EnvModel, TaskMode::Hunt, None)?;
///
/// // In training loop:
/// manager.maybe_save(&agent, ModelKind::I2a, TaskMode::Hunt, update)?;
/// ```
pub struct CheckpointManager {
    config: CheckpointConfig,
}

impl CheckpointManager {
    pub const EXTENSION: &'static str = "ot";

    /// Create a new checkpoint manager.
    pub fn new(config: CheckpointConfig) -> Self {
        if let Err(e) = fs::create_dir_all(&config.checkpoint_dir) {
            tracing::warn!("Failed to create checkpoint directory: {}", e);
        }

        Self { config }
    }

    /// Get the checkpoint directory path.
    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// File name stem for a checkpoint, e.g. `i2a_hunt_20000` or `env_model_regular`.
    pub fn stem(kind: ModelKind, mode: TaskMode, iteration: Option<u64>) -> String {
        match iteration {
            Some(iteration) => format!("{}_{}_{}", kind.prefix(), mode, iteration),
            None => format!("{}_{}", kind.prefix(), mode),
        }
    }

    pub fn path(&self, kind: ModelKind, mode: TaskMode, iteration: Option<u64>) -> PathBuf {
        self.config
            .checkpoint_dir
            .join(Self::stem(kind, mode, iteration))
            .with_extension(Self::EXTENSION)
    }

    /// Save a periodic checkpoint if `iteration` is a positive multiple of
    /// `save_every`.
    ///
    /// Returns the path to the saved checkpoint, or None if no save was performed.
    pub fn maybe_save<M: HasVarStore + ?Sized>(
        &self,
        model: &M,
        kind: ModelKind,
        mode: TaskMode,
        iteration: u64,
    ) -> Result<Option<PathBuf>> {
        if iteration == 0
            || self.config.save_every == 0
            || iteration % self.config.save_every != 0
        {
            return Ok(None);
        }

        self.save(model, kind, mode, Some(iteration)).map(Some)
    }

    /// Save `model`'s variables. `iteration: None` writes the final checkpoint.
    pub fn save<M: HasVarStore + ?Sized>(
        &self,
        model: &M,
        kind: ModelKind,
        mode: TaskMode,
        iteration: Option<u64>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.config.checkpoint_dir)?;
        let path = self.path(kind, mode, iteration);

        model.var_store().save(&path)?;
        tracing::info!(path = %path.display(), kind = kind.prefix(), %mode, ?iteration, "Saved checkpoint");

        if iteration.is_some() && self.config.keep_last > 0 {
            self.cleanup_old_checkpoints(kind, mode)?;
        }

        Ok(path)
    }

    /// Load `model`'s variables from the checkpoint for `kind`/`mode`/`iteration`.
    pub fn load<M: HasVarStore + ?Sized>(
        &self,
        model: &mut M,
        kind: ModelKind,
        mode: TaskMode,
        iteration: Option<u64>,
    ) -> Result<PathBuf> {
        let path = self.path(kind, mode, iteration);
        self.load_from_path(model, &path)?;
        Ok(path)
    }

    /// Load the highest-iteration periodic checkpoint.
    ///
    /// Returns the iteration if a checkpoint was loaded, or None if none exist.
    pub fn load_latest<M: HasVarStore + ?Sized>(
        &self,
        model: &mut M,
        kind: ModelKind,
        mode: TaskMode,
    ) -> Result<Option<u64>> {
        match self.list_iterations(kind, mode)?.pop() {
            Some(iteration) => {
                self.load(model, kind, mode, Some(iteration))?;
                Ok(Some(iteration))
            }
            None => Ok(None),
        }
    }

    /// Load a specific checkpoint file.
    pub fn load_from_path<M: HasVarStore + ?Sized>(
        &self,
        model: &mut M,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(I2aError::MissingCheckpoint {
                path: path.to_path_buf(),
            });
        }
        model.var_store_mut().load(path)?;
        tracing::info!(path = %path.display(), "Loaded checkpoint");
        Ok(())
    }

    /// Iterations of the periodic checkpoints on disk, ascending.
    pub fn list_iterations(&self, kind: ModelKind, mode: TaskMode) -> Result<Vec<u64>> {
        let entries = match fs::read_dir(&self.config.checkpoint_dir) {
            Ok(e) => e,
            Err(_) => return Ok(Vec::new()),
        };

        let prefix = format!("{}_", Self::stem(kind, mode, None));
        let mut iterations: Vec<u64> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(Self::EXTENSION))
            .filter_map(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.strip_prefix(prefix.as_str()))
                    .and_then(|s| s.parse().ok())
            })
            .collect();

        iterations.sort_unstable();
        Ok(iterations)
    }

    /// Remove old periodic checkpoints, keeping only the last N.
    fn cleanup_old_checkpoints(&self, kind: ModelKind, mode: TaskMode) -> Result<()> {
        let iterations = self.list_iterations(kind, mode)?;
        let excess = iterations.len().saturating_sub(self.config.keep_last);

        for &iteration in &iterations[..excess] {
            let old = self.path(kind, mode, Some(iteration));
            if let Err(e) = fs::remove_file(&old) {
                tracing::warn!(path = %old.display(), "Failed to remove old checkpoint: {}", e);
            } else {
                tracing::debug!(path = %old.display(), "Removed old checkpoint");
            }
        }

        Ok(())
    }
}
