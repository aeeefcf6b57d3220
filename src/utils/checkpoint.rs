//! Checkpoint save/load utilities
//!
//! Network weights and a small metadata file are written per epoch under
//! `{checkpoint_root}/{run_id}/{dataset}/`:
//! `G_{epoch}.ot`, `D_A_{epoch}.ot`, `D_B_{epoch}.ot` and `meta_{epoch}.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::CycleGan;
use crate::training::EpochRecord;
use crate::utils::HyperParameters;

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Completed epochs
    pub epoch: usize,
    /// Learning rate factor in effect after the epoch
    pub lr_factor: f64,
    /// Mean losses of the last epoch, if one was recorded
    pub losses: Option<EpochRecord>,
    /// Timestamp of checkpoint
    pub timestamp: String,
    /// Run the checkpoint belongs to
    pub run_id: String,
}

/// Directory of per-epoch checkpoints for one run
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    run_id: String,
}

impl CheckpointStore {
    /// Store rooted at `{root}/{run_id}/{dataset}`
    pub fn new(root: impl AsRef<Path>, run_id: &str, dataset: &str) -> Self {
        Self {
            dir: root.as_ref().join(run_id).join(dataset),
            run_id: run_id.to_string(),
        }
    }

    /// Store for the run described by `params`
    pub fn from_params(params: &HyperParameters) -> Self {
        Self::new(&params.checkpoint_root, params.run_id(), &params.dataset_name)
    }

    /// Directory holding the checkpoints
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the run's per-epoch metrics CSV lives
    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join("metrics.csv")
    }

    fn weight_paths(&self, epoch: usize) -> [PathBuf; 3] {
        [
            self.dir.join(format!("G_{}.ot", epoch)),
            self.dir.join(format!("D_A_{}.ot", epoch)),
            self.dir.join(format!("D_B_{}.ot", epoch)),
        ]
    }

    fn meta_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("meta_{}.json", epoch))
    }

    /// Save a complete checkpoint (model + metadata)
    ///
    /// # Arguments
    ///
    /// * `model` - networks to save
    /// * `epoch` - number of completed epochs
    /// * `lr_factor` - learning rate factor after the epoch
    /// * `losses` - mean losses of the epoch
    pub fn save(
        &self,
        model: &CycleGan,
        epoch: usize,
        lr_factor: f64,
        losses: Option<&EpochRecord>,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let [gen_path, d_a_path, d_b_path] = self.weight_paths(epoch);
        model.save(&gen_path, &d_a_path, &d_b_path)?;

        let meta = CheckpointMeta {
            epoch,
            lr_factor,
            losses: losses.copied(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            run_id: self.run_id.clone(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)?;
        std::fs::write(self.meta_path(epoch), meta_json)?;

        info!("Saved checkpoint for epoch {} to {}", epoch, self.dir.display());
        Ok(gen_path)
    }

    /// Load checkpoint metadata
    pub fn load_meta(&self, epoch: usize) -> Result<CheckpointMeta> {
        let content = std::fs::read_to_string(self.meta_path(epoch))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Restore the weights saved for `epoch`
    pub fn load(&self, model: &mut CycleGan, epoch: usize) -> Result<()> {
        let [gen_path, d_a_path, d_b_path] = self.weight_paths(epoch);
        if !gen_path.exists() {
            return Err(Error::config(format!(
                "no checkpoint for epoch {} in {}",
                epoch,
                self.dir.display()
            )));
        }
        model.load(&gen_path, &d_a_path, &d_b_path)?;

        info!("Loaded checkpoint from {} (epoch {})", self.dir.display(), epoch);
        Ok(())
    }

    /// Epochs with a saved checkpoint, ascending
    pub fn list_epochs(&self) -> Vec<usize> {
        let mut epochs: Vec<usize> = std::fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_prefix("meta_"))
                    .and_then(|n| n.strip_suffix(".json"))
                    .and_then(|n| n.parse().ok())
            })
            .collect();
        epochs.sort_unstable();
        epochs
    }

    /// Find the latest checkpoint epoch
    pub fn latest_epoch(&self) -> Option<usize> {
        self.list_epochs().last().copied()
    }
}
