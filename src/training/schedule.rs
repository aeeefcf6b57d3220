//! Linear learning rate decay
//!
//! The rate stays at its base value until `decay_epoch`, then falls
//! linearly to zero at `total_epochs`. One factor function drives the
//! generator optimizer and both discriminator optimizers.

use crate::error::{Error, Result};
use crate::model::Optimizers;

/// Multiplicative decay factor as a function of epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearDecay {
    total_epochs: usize,
    start_epoch: usize,
    decay_epoch: usize,
}

impl LinearDecay {
    /// Create a schedule; `decay_epoch` must be before `total_epochs`
    pub fn new(total_epochs: usize, start_epoch: usize, decay_epoch: usize) -> Result<Self> {
        if decay_epoch >= total_epochs {
            return Err(Error::config(format!(
                "decay_epoch ({}) must be < total_epochs ({})",
                decay_epoch, total_epochs
            )));
        }
        Ok(Self {
            total_epochs,
            start_epoch,
            decay_epoch,
        })
    }

    /// Factor for `epoch`, counted in epochs completed since `start_epoch`
    ///
    /// `1 - max(0, epoch + start_epoch - decay_epoch) / (total_epochs - decay_epoch)`,
    /// clamped to [0, 1].
    pub fn factor(&self, epoch: usize) -> f64 {
        let absolute = (epoch + self.start_epoch) as f64;
        let decayed = (absolute - self.decay_epoch as f64).max(0.0);
        let span = (self.total_epochs - self.decay_epoch) as f64;
        (1.0 - decayed / span).clamp(0.0, 1.0)
    }

    /// Slope of the factor per epoch inside the decay region
    pub fn slope(&self) -> f64 {
        -1.0 / (self.total_epochs - self.decay_epoch) as f64
    }
}

/// Applies a `LinearDecay` to the three optimizers in lockstep
#[derive(Debug, Clone)]
pub struct LrScheduler {
    schedule: LinearDecay,
    base_lr: f64,
    epochs_stepped: usize,
}

impl LrScheduler {
    /// Create a scheduler starting at the base rate
    pub fn new(schedule: LinearDecay, base_lr: f64) -> Self {
        Self {
            schedule,
            base_lr,
            epochs_stepped: 0,
        }
    }

    /// Learning rate currently in effect
    pub fn current_lr(&self) -> f64 {
        self.base_lr * self.current_factor()
    }

    /// Decay factor currently in effect
    pub fn current_factor(&self) -> f64 {
        self.schedule.factor(self.epochs_stepped)
    }

    /// Advance one completed epoch and push the new rate to all optimizers
    ///
    /// Returns the new learning rate. Call exactly once per epoch.
    pub fn step(&mut self, optimizers: &mut Optimizers) -> f64 {
        self.epochs_stepped += 1;
        let lr = self.current_lr();
        optimizers.set_lr(lr);
        lr
    }

    /// Epochs stepped so far
    pub fn epochs_stepped(&self) -> usize {
        self.epochs_stepped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_decay_after_end() {
        assert!(LinearDecay::new(10, 0, 10).is_err());
        assert!(LinearDecay::new(10, 0, 12).is_err());
        assert!(LinearDecay::new(10, 0, 9).is_ok());
    }

    #[test]
    fn test_flat_before_decay() {
        let schedule = LinearDecay::new(200, 0, 100).unwrap();
        for epoch in 0..=100 {
            assert_eq!(schedule.factor(epoch), 1.0);
        }
    }

    #[test]
    fn test_reaches_zero_at_total() {
        let schedule = LinearDecay::new(200, 0, 100).unwrap();
        assert_eq!(schedule.factor(200), 0.0);
        assert_eq!(schedule.factor(250), 0.0);
    }

    #[test]
    fn test_non_increasing_with_constant_slope() {
        let schedule = LinearDecay::new(30, 0, 10).unwrap();
        let factors: Vec<f64> = (0..=30).map(|e| schedule.factor(e)).collect();

        for w in factors.windows(2) {
            assert!(w[1] <= w[0]);
        }
        for e in 10..30 {
            let diff = schedule.factor(e + 1) - schedule.factor(e);
            assert!((diff - schedule.slope()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_start_epoch_offsets_schedule() {
        let fresh = LinearDecay::new(100, 0, 50).unwrap();
        let resumed = LinearDecay::new(100, 60, 50).unwrap();
        assert_eq!(resumed.factor(0), fresh.factor(60));
        assert_eq!(resumed.factor(5), fresh.factor(65));
    }

    #[test]
    fn test_scheduler_tracks_epochs() {
        let schedule = LinearDecay::new(4, 0, 2).unwrap();
        let scheduler = LrScheduler::new(schedule, 0.1);
        assert_eq!(scheduler.current_lr(), 0.1);
        assert_eq!(scheduler.epochs_stepped(), 0);
    }
}
