//! Configuration management
//!
//! `HyperParameterConfig` is the editable form (file, CLI, sweep grid).
//! `HyperParameters` is the validated, read-only form a training run holds.

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::path::Path;

use crate::error::{Error, Result};

/// Hyperparameters and paths for a single training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParameterConfig {
    /// Dataset name, e.g. "horse2zebra"
    pub dataset_name: String,
    /// Directory holding `{dataset_name}/{train,test}/{A,B}`
    pub data_root: String,
    /// Sub-directory with domain A images
    pub domain_a_dir: String,
    /// Sub-directory with domain B images
    pub domain_b_dir: String,
    /// Pick the B image independently of the A index
    pub unaligned: bool,
    /// Where sample grids are written
    pub sample_root: String,
    /// Where checkpoints and metrics are written
    pub checkpoint_root: String,
    /// Number of epochs to train to
    pub total_epochs: usize,
    /// Epoch to start (resume) from
    pub start_epoch: usize,
    /// Epoch at which linear learning rate decay starts
    pub decay_epoch: usize,
    /// Base learning rate for all three optimizers
    pub learning_rate: f64,
    /// Training batch size
    pub batch_size: usize,
    /// Batch size of the held-out sampling batches
    pub test_batch_size: usize,
    /// Adam beta1
    pub beta1: f64,
    /// Adam beta2
    pub beta2: f64,
    /// Residual blocks in each generator
    pub residual_blocks: usize,
    /// Image height
    pub img_height: i64,
    /// Image width
    pub img_width: i64,
    /// Image channels
    pub channels: i64,
    /// Cycle-consistency loss weight
    pub lambda_cycle: f64,
    /// Identity loss weight
    pub lambda_identity: f64,
    /// Save a sample grid every N global batches
    pub sample_interval: usize,
    /// Save a checkpoint every N epochs, -1 disables
    pub checkpoint_interval: i64,
    /// Capacity of each replay buffer
    pub replay_capacity: usize,
    /// Seed for libtorch and the crate RNGs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Device: "cpu", "cuda" or "auto"
    pub device: String,
}

impl Default for HyperParameterConfig {
    fn default() -> Self {
        Self {
            dataset_name: "horse2zebra".to_string(),
            data_root: "data".to_string(),
            domain_a_dir: "A".to_string(),
            domain_b_dir: "B".to_string(),
            unaligned: true,
            sample_root: "generated_images".to_string(),
            checkpoint_root: "saved_models".to_string(),
            total_epochs: 200,
            start_epoch: 0,
            decay_epoch: 100,
            learning_rate: 2e-4,
            batch_size: 1,
            test_batch_size: 5,
            beta1: 0.5,
            beta2: 0.999,
            residual_blocks: 9,
            img_height: 32,
            img_width: 32,
            channels: 3,
            lambda_cycle: 10.0,
            lambda_identity: 5.0,
            sample_interval: 500,
            checkpoint_interval: -1,
            replay_capacity: 50,
            seed: None,
            device: "auto".to_string(),
        }
    }
}

impl HyperParameterConfig {
    /// Load configuration from TOML file
    pub fn from_toml(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: &str) -> Result<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: &str) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load from a `.toml` or `.json` file, chosen by extension
    pub fn from_file(path: &str) -> Result<Self> {
        if path.ends_with(".toml") {
            Self::from_toml(path)
        } else {
            Self::from_json(path)
        }
    }

    /// Save to a `.toml` or `.json` file, chosen by extension
    pub fn save(&self, path: &str) -> Result<()> {
        if path.ends_with(".toml") {
            self.save_toml(path)
        } else {
            self.save_json(path)
        }
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) if Path::new(p).exists() => Self::from_file(p),
            Some(p) => {
                tracing::info!("Config file {} not found, using defaults", p);
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Identifier used to namespace a run's outputs
    pub fn run_id(&self) -> String {
        format!(
            "ep_{}_lr_{}_decay_{}_resnum_{}",
            self.total_epochs, self.learning_rate, self.decay_epoch, self.residual_blocks
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.total_epochs == 0 {
            return Err(Error::config("total_epochs must be > 0"));
        }
        if self.start_epoch >= self.total_epochs {
            return Err(Error::config(format!(
                "start_epoch ({}) must be < total_epochs ({})",
                self.start_epoch, self.total_epochs
            )));
        }
        if self.decay_epoch >= self.total_epochs {
            return Err(Error::config(format!(
                "decay_epoch ({}) must be < total_epochs ({})",
                self.decay_epoch, self.total_epochs
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }
        if self.test_batch_size == 0 {
            return Err(Error::config("test_batch_size must be > 0"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::config(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(Error::config(format!("{} must be in [0, 1), got {}", name, beta)));
            }
        }
        if self.residual_blocks == 0 {
            return Err(Error::config("residual_blocks must be > 0"));
        }
        if self.channels <= 0 {
            return Err(Error::config("channels must be > 0"));
        }
        for (name, side) in [("img_height", self.img_height), ("img_width", self.img_width)] {
            if side < 16 || side % 16 != 0 {
                return Err(Error::config(format!(
                    "{} must be a positive multiple of 16, got {}",
                    name, side
                )));
            }
        }
        for (name, lambda) in [
            ("lambda_cycle", self.lambda_cycle),
            ("lambda_identity", self.lambda_identity),
        ] {
            if !lambda.is_finite() || lambda < 0.0 {
                return Err(Error::config(format!("{} must be finite and >= 0", name)));
            }
        }
        if self.sample_interval == 0 {
            return Err(Error::config("sample_interval must be > 0"));
        }
        if self.checkpoint_interval == 0 || self.checkpoint_interval < -1 {
            return Err(Error::config(format!(
                "checkpoint_interval must be -1 (disabled) or > 0, got {}",
                self.checkpoint_interval
            )));
        }
        if self.replay_capacity == 0 {
            return Err(Error::config("replay_capacity must be > 0"));
        }
        Ok(())
    }
}

/// Validated, immutable hyperparameters of one run
///
/// Fields are readable through `Deref`; the only way to build one is
/// [`HyperParameters::new`], so every instance has passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperParameters {
    config: HyperParameterConfig,
    run_id: String,
}

impl HyperParameters {
    /// Validate `config` and freeze it
    pub fn new(config: HyperParameterConfig) -> Result<Self> {
        config.validate()?;
        let run_id = config.run_id();
        Ok(Self { config, run_id })
    }

    /// Run identifier derived from the configuration
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Checkpoint interval in epochs, if enabled
    pub fn checkpoint_every(&self) -> Option<usize> {
        usize::try_from(self.config.checkpoint_interval)
            .ok()
            .filter(|&n| n > 0)
    }

    /// Copy of the underlying editable configuration
    pub fn to_config(&self) -> HyperParameterConfig {
        self.config.clone()
    }
}

impl Deref for HyperParameters {
    type Target = HyperParameterConfig;

    fn deref(&self) -> &Self::Target {
        &self.config
    }
}

impl TryFrom<HyperParameterConfig> for HyperParameters {
    type Error = Error;

    fn try_from(config: HyperParameterConfig) -> Result<Self> {
        Self::new(config)
    }
}
