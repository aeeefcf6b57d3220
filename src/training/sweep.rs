//! Grid sweep over hyperparameter combinations
//!
//! Each point of the Cartesian product is validated and trained on its
//! own, under its own run id, so a failing point never touches the
//! output directories of another.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::metrics::TrainingMetrics;
use crate::error::Result;
use crate::utils::{HyperParameterConfig, HyperParameters};

/// Values to sweep, expanded as epochs x learning rates x decay epochs x residual blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepGrid {
    pub num_epochs: Vec<usize>,
    pub learning_rates: Vec<f64>,
    pub decay_epochs: Vec<usize>,
    pub residual_blocks: Vec<usize>,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            num_epochs: vec![200, 300],
            learning_rates: vec![2e-4, 1e-4],
            decay_epochs: vec![100],
            residual_blocks: vec![9, 5, 3],
        }
    }
}

impl SweepGrid {
    /// Number of points in the grid
    pub fn len(&self) -> usize {
        self.num_epochs.len() * self.learning_rates.len() * self.decay_epochs.len() * self.residual_blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every combination applied to `base`, in nesting order
    pub fn expand(&self, base: &HyperParameterConfig) -> Vec<HyperParameterConfig> {
        let mut points = Vec::with_capacity(self.len());
        for &total_epochs in &self.num_epochs {
            for &learning_rate in &self.learning_rates {
                for &decay_epoch in &self.decay_epochs {
                    for &residual_blocks in &self.residual_blocks {
                        points.push(HyperParameterConfig {
                            total_epochs,
                            learning_rate,
                            decay_epoch,
                            residual_blocks,
                            ..base.clone()
                        });
                    }
                }
            }
        }
        points
    }
}

/// What to do when one sweep point fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure and go on with the next point
    #[default]
    Continue,
    /// Stop at the first failure
    Abort,
}

/// Result of one sweep point
#[derive(Debug)]
pub struct SweepOutcome {
    pub run_id: String,
    pub result: Result<TrainingMetrics>,
}

impl SweepOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `train` for every point of `grid` over `base`
///
/// Invalid points fail without calling `train`. Returns one outcome per
/// point attempted; with `FailurePolicy::Abort` the last one is the failure.
pub fn run_sweep<F>(
    base: &HyperParameterConfig,
    grid: &SweepGrid,
    policy: FailurePolicy,
    mut train: F,
) -> Vec<SweepOutcome>
where
    F: FnMut(HyperParameters) -> Result<TrainingMetrics>,
{
    let points = grid.expand(base);
    let total = points.len();
    let mut outcomes = Vec::with_capacity(total);

    for (i, config) in points.into_iter().enumerate() {
        let run_id = config.run_id();
        info!("Sweep point {}/{}: {}", i + 1, total, run_id);

        let result = HyperParameters::new(config).and_then(&mut train);
        let failed = match &result {
            Ok(_) => false,
            Err(e) => {
                error!("Sweep point {} failed: {}", run_id, e);
                true
            }
        };

        outcomes.push(SweepOutcome { run_id, result });
        if failed && policy == FailurePolicy::Abort {
            break;
        }
    }

    let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
    info!("Sweep finished: {}/{} points succeeded", succeeded, outcomes.len());
    outcomes
}
