//! Training metrics for monitoring CycleGAN progress
//!
//! Provides structures for tracking and logging training progress.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::step::LossComponents;
use crate::error::Result;

/// Mean losses of one epoch and the learning rate it ran with
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub identity: f64,
    pub adversarial: f64,
    pub cycle: f64,
    pub generator_total: f64,
    pub discriminator_a: f64,
    pub discriminator_b: f64,
    pub learning_rate: f64,
}

impl EpochRecord {
    /// Mean of both discriminator losses
    pub fn discriminator_mean(&self) -> f64 {
        (self.discriminator_a + self.discriminator_b) / 2.0
    }
}

/// Running sum of per-batch losses within an epoch
#[derive(Debug, Clone, Default)]
pub struct EpochAccumulator {
    sum: LossComponents,
    batches: usize,
}

impl EpochAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch
    pub fn push(&mut self, losses: &LossComponents) {
        self.sum.identity += losses.identity;
        self.sum.adversarial += losses.adversarial;
        self.sum.cycle += losses.cycle;
        self.sum.generator_total += losses.generator_total;
        self.sum.discriminator_a += losses.discriminator_a;
        self.sum.discriminator_b += losses.discriminator_b;
        self.batches += 1;
    }

    /// Number of batches added
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Per-batch mean; all zeros when nothing was added
    pub fn mean(&self) -> LossComponents {
        if self.batches == 0 {
            return LossComponents::default();
        }
        let n = self.batches as f64;
        LossComponents {
            identity: self.sum.identity / n,
            adversarial: self.sum.adversarial / n,
            cycle: self.sum.cycle / n,
            generator_total: self.sum.generator_total / n,
            discriminator_a: self.sum.discriminator_a / n,
            discriminator_b: self.sum.discriminator_b / n,
        }
    }

    /// Close the epoch into a record
    pub fn finish(&self, epoch: usize, learning_rate: f64) -> EpochRecord {
        let mean = self.mean();
        EpochRecord {
            epoch,
            identity: mean.identity,
            adversarial: mean.adversarial,
            cycle: mean.cycle,
            generator_total: mean.generator_total,
            discriminator_a: mean.discriminator_a,
            discriminator_b: mean.discriminator_b,
            learning_rate,
        }
    }
}

/// Metrics collected during training
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingMetrics {
    /// One record per completed epoch
    pub epochs: Vec<EpochRecord>,
}

impl TrainingMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record epoch metrics
    pub fn record_epoch(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    /// Get number of recorded epochs
    pub fn num_epochs(&self) -> usize {
        self.epochs.len()
    }

    /// Latest record
    pub fn latest(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// Get latest generator loss
    pub fn latest_gen_loss(&self) -> Option<f64> {
        self.latest().map(|r| r.generator_total)
    }

    /// Get latest discriminator loss
    pub fn latest_disc_loss(&self) -> Option<f64> {
        self.latest().map(|r| r.discriminator_mean())
    }

    /// Save metrics to CSV file
    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.epochs {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load metrics from CSV file
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut metrics = Self::new();

        for result in reader.deserialize() {
            metrics.record_epoch(result?);
        }

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn losses(g: f64, d: f64) -> LossComponents {
        LossComponents {
            identity: 0.1,
            adversarial: 0.2,
            cycle: 0.3,
            generator_total: g,
            discriminator_a: d,
            discriminator_b: d,
        }
    }

    #[test]
    fn test_accumulator_means() {
        let mut acc = EpochAccumulator::new();
        assert_eq!(acc.mean(), LossComponents::default());

        acc.push(&losses(1.0, 0.2));
        acc.push(&losses(3.0, 0.4));

        let record = acc.finish(7, 1e-4);
        assert_eq!(acc.batches(), 2);
        assert_eq!(record.epoch, 7);
        assert!((record.generator_total - 2.0).abs() < 1e-12);
        assert!((record.discriminator_mean() - 0.3).abs() < 1e-12);
        assert_eq!(record.learning_rate, 1e-4);
    }

    #[test]
    fn test_training_metrics() {
        let mut metrics = TrainingMetrics::new();
        let mut acc = EpochAccumulator::new();
        acc.push(&losses(1.5, 0.8));
        metrics.record_epoch(acc.finish(0, 2e-4));
        let mut acc = EpochAccumulator::new();
        acc.push(&losses(1.25, 0.8));
        metrics.record_epoch(acc.finish(1, 2e-4));

        assert_eq!(metrics.num_epochs(), 2);
        assert_eq!(metrics.latest_gen_loss(), Some(1.25));
        assert_eq!(metrics.latest_disc_loss(), Some(0.8));
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");

        let mut metrics = TrainingMetrics::new();
        let mut acc = EpochAccumulator::new();
        acc.push(&losses(0.9, 0.25));
        metrics.record_epoch(acc.finish(3, 5e-5));
        metrics.save_csv(&path).unwrap();

        let loaded = TrainingMetrics::load_csv(&path).unwrap();
        assert_eq!(loaded, metrics);
    }
}
