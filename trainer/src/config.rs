use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::TrainErr;

/// Static run configuration consumed at startup.
///
/// Hyperparameters are identical on every rank; rank identity itself comes
/// from the launch environment, not from this file.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainConfig {
    pub epochs: NonZeroUsize,
    /// Global batch size across all ranks; must divide by the rank count.
    pub batch_size: NonZeroUsize,
    pub timesteps_per_trial: NonZeroUsize,
    /// Timestep within a trial at which the response window opens.
    pub response_start: usize,
    #[serde(default = "default_timestep_ms")]
    pub timestep_ms: f32,
    pub network: NetworkConfig,
    pub learning_rate: f32,
    /// Per-epoch multiplicative learning-rate decay.
    #[serde(default = "default_lr_decay")]
    pub lr_decay_per_epoch: f32,
    pub seed: Option<u64>,
    /// Flat label file, one byte per training example.
    pub labels: PathBuf,
    pub checkpoint_dir: PathBuf,
    /// Save a checkpoint every this many epochs.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: NonZeroUsize,
    /// Resume from the checkpoint written at this epoch; training restarts
    /// at the following epoch.
    #[serde(default)]
    pub resume_epoch: Option<usize>,
    /// Batch progress report, written by the coordinator rank only.
    pub report: PathBuf,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct NetworkConfig {
    pub inputs: NonZeroUsize,
    pub hidden: NonZeroUsize,
    pub classes: NonZeroUsize,
}

fn default_timestep_ms() -> f32 {
    1.0
}

fn default_lr_decay() -> f32 {
    1.0
}

fn default_checkpoint_interval() -> NonZeroUsize {
    NonZeroUsize::MIN
}

impl TrainConfig {
    pub fn from_file(path: &Path) -> Result<Self, TrainErr> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| TrainErr::Config {
            reason: format!("{}: {e}", path.display()),
        })
    }

    pub fn validate(&self) -> Result<(), TrainErr> {
        if self.response_start >= self.timesteps_per_trial.get() {
            return Err(TrainErr::Config {
                reason: format!(
                    "response_start ({}) must fall inside the trial ({} timesteps)",
                    self.response_start,
                    self.timesteps_per_trial.get()
                ),
            });
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainErr::Config {
                reason: format!("learning_rate must be positive, got {}", self.learning_rate),
            });
        }
        if !self.lr_decay_per_epoch.is_finite() || self.lr_decay_per_epoch <= 0.0 {
            return Err(TrainErr::Config {
                reason: format!(
                    "lr_decay_per_epoch must be positive, got {}",
                    self.lr_decay_per_epoch
                ),
            });
        }
        if !self.timestep_ms.is_finite() || self.timestep_ms <= 0.0 {
            return Err(TrainErr::Config {
                reason: format!("timestep_ms must be positive, got {}", self.timestep_ms),
            });
        }
        Ok(())
    }

    /// Per-rank share of the global batch.
    pub fn rank_batch_size(&self, num_ranks: usize) -> Result<usize, TrainErr> {
        let batch = self.batch_size.get();
        if batch % num_ranks != 0 {
            return Err(TrainErr::Config {
                reason: format!("batch_size {batch} does not divide across {num_ranks} ranks"),
            });
        }
        Ok(batch / num_ranks)
    }
}
