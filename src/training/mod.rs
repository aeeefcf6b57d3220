//! Training module for CycleGAN
//!
//! This module provides:
//! - Replay buffers of generated samples
//! - Linear learning rate decay
//! - Adversarial, cycle-consistency and identity losses
//! - The per-batch training step state machine
//! - Training loop, metrics and hyperparameter sweeps

mod losses;
mod metrics;
mod replay_buffer;
mod schedule;
mod step;
mod sweep;
mod trainer;

pub use losses::{adversarial_loss, discriminator_loss, l1, mse, AdversarialLossSet, GeneratorLosses, Networks};
pub use metrics::{EpochAccumulator, EpochRecord, TrainingMetrics};
pub use replay_buffer::{ReplayBuffer, ReplayBuffers, DEFAULT_CAPACITY};
pub use schedule::{LinearDecay, LrScheduler};
pub use step::{BatchPosition, GeneratedFakes, LossComponents, StepContext, StepOutcome, StepPhase, TrainingStep};
pub use sweep::{run_sweep, FailurePolicy, SweepGrid, SweepOutcome};
pub use trainer::{train_from_params, NoSampler, Sampler, Trainer, TrainingState};
