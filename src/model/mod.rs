//! Model module containing the CycleGAN networks
//!
//! This module provides:
//! - ResNet generator translating images between domains
//! - PatchGAN discriminator scoring image patches
//! - CycleGan wrapper bundling the four networks and their optimizers

mod cyclegan;
mod discriminator;
mod generator;

pub use cyclegan::{CycleGan, Optimizers};
pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use generator::{Generator, GeneratorConfig};
