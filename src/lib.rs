//! # CycleGAN for Unpaired Image-to-Image Translation
//!
//! This crate provides a modular implementation of CycleGAN training:
//! two generators translating between image domains A and B, two
//! discriminators, replay buffers of past fakes and a linearly decaying
//! learning rate.
//!
//! ## Modules
//!
//! - `data`: Image datasets, augmentation and batching
//! - `model`: CycleGAN architecture (ResNet generators, PatchGAN discriminators)
//! - `training`: Training step, training loop, losses and sweeps
//! - `utils`: Configuration, device selection, checkpoints and sample grids
//! - `error`: Error types

pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;

pub use data::{Batch, DataLoader, ImageFolderDataset, PairedDataset, TensorDataset};
pub use error::{Error, Result};
pub use model::{CycleGan, Discriminator, Generator};
pub use training::{run_sweep, AdversarialLossSet, LinearDecay, ReplayBuffer, Trainer, TrainingMetrics, TrainingStep};
pub use utils::{CheckpointStore, HyperParameterConfig, HyperParameters};
