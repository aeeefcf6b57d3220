//! CycleGAN wrapper holding both generators and both discriminators
//!
//! G_AB and G_BA live in one variable store so a single optimizer updates
//! both. D_A and D_B each have their own store and optimizer.

use std::path::Path;
use tch::{nn, nn::OptimizerConfig, nn::VarStore, Device};

use super::discriminator::{Discriminator, DiscriminatorConfig};
use super::generator::{Generator, GeneratorConfig};
use crate::error::Result;
use crate::utils::HyperParameters;

/// The four networks of a CycleGAN
pub struct CycleGan {
    /// Translates A -> B
    pub g_ab: Generator,
    /// Translates B -> A
    pub g_ba: Generator,
    /// Scores domain A images
    pub d_a: Discriminator,
    /// Scores domain B images
    pub d_b: Discriminator,
    /// Variable store for both generators
    pub gen_vs: VarStore,
    /// Variable store for D_A
    pub d_a_vs: VarStore,
    /// Variable store for D_B
    pub d_b_vs: VarStore,
    /// Device (CPU/GPU)
    pub device: Device,
}

/// Adam optimizers for the generator pair and each discriminator
pub struct Optimizers {
    pub generator: nn::Optimizer,
    pub d_a: nn::Optimizer,
    pub d_b: nn::Optimizer,
}

impl Optimizers {
    /// Set the same learning rate on all three optimizers
    pub fn set_lr(&mut self, lr: f64) {
        self.generator.set_lr(lr);
        self.d_a.set_lr(lr);
        self.d_b.set_lr(lr);
    }
}

impl CycleGan {
    /// Create a new CycleGAN model
    pub fn new(gen_config: GeneratorConfig, disc_config: DiscriminatorConfig, device: Device) -> Self {
        let gen_vs = VarStore::new(device);
        let d_a_vs = VarStore::new(device);
        let d_b_vs = VarStore::new(device);

        let g_ab = Generator::new(&(gen_vs.root() / "g_ab"), gen_config.clone());
        let g_ba = Generator::new(&(gen_vs.root() / "g_ba"), gen_config);
        let d_a = Discriminator::new(&d_a_vs.root(), disc_config.clone());
        let d_b = Discriminator::new(&d_b_vs.root(), disc_config);

        Self {
            g_ab,
            g_ba,
            d_a,
            d_b,
            gen_vs,
            d_a_vs,
            d_b_vs,
            device,
        }
    }

    /// Create a CycleGAN sized by the run's hyperparameters
    pub fn from_params(params: &HyperParameters, device: Device) -> Self {
        let gen_config = GeneratorConfig {
            channels: params.channels,
            residual_blocks: params.residual_blocks,
            ..Default::default()
        };
        let disc_config = DiscriminatorConfig {
            channels: params.channels,
            img_height: params.img_height,
            img_width: params.img_width,
            ..Default::default()
        };
        Self::new(gen_config, disc_config, device)
    }

    /// Build the three Adam optimizers at the given learning rate
    pub fn optimizers(&self, lr: f64, beta1: f64, beta2: f64) -> Result<Optimizers> {
        let adam = nn::Adam {
            beta1,
            beta2,
            wd: 0.0,
            ..Default::default()
        };
        Ok(Optimizers {
            generator: adam.build(&self.gen_vs, lr)?,
            d_a: adam.build(&self.d_a_vs, lr)?,
            d_b: adam.build(&self.d_b_vs, lr)?,
        })
    }

    /// Save all three variable stores
    pub fn save<P: AsRef<Path>>(&self, gen_path: P, d_a_path: P, d_b_path: P) -> Result<()> {
        self.gen_vs.save(gen_path)?;
        self.d_a_vs.save(d_a_path)?;
        self.d_b_vs.save(d_b_path)?;
        Ok(())
    }

    /// Load all three variable stores
    pub fn load<P: AsRef<Path>>(&mut self, gen_path: P, d_a_path: P, d_b_path: P) -> Result<()> {
        self.gen_vs.load(gen_path)?;
        self.d_a_vs.load(d_a_path)?;
        self.d_b_vs.load(d_b_path)?;
        Ok(())
    }
}
