//! PatchGAN discriminator
//!
//! Scores overlapping patches of an image as real or fake instead of
//! producing a single scalar per image.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

use super::generator::{conv_config, instance_norm};

/// Discriminator network configuration
#[derive(Debug, Clone)]
pub struct DiscriminatorConfig {
    /// Number of image channels
    pub channels: i64,
    /// Image height
    pub img_height: i64,
    /// Image width
    pub img_width: i64,
    /// Filters of the first block
    pub base_filters: i64,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            channels: 3,
            img_height: 32,
            img_width: 32,
            base_filters: 64,
        }
    }
}

/// Discriminator network
///
/// Architecture:
/// 1. Four stride-2 4x4 convolutions with LeakyReLU(0.2), instance norm
///    on all but the first
/// 2. Asymmetric zero pad and a final 4x4 convolution to one channel
#[derive(Debug)]
pub struct Discriminator {
    config: DiscriminatorConfig,
    blocks: Vec<nn::Conv2D>,
    output: nn::Conv2D,
}

impl Discriminator {
    /// Create a new Discriminator network
    pub fn new(vs: &nn::Path, config: DiscriminatorConfig) -> Self {
        let base = config.base_filters;
        let widths = [config.channels, base, base * 2, base * 4, base * 8];

        let blocks = widths
            .windows(2)
            .enumerate()
            .map(|(i, w)| nn::conv2d(vs / "block" / i, w[0], w[1], 4, conv_config(2, 1)))
            .collect();

        let output = nn::conv2d(vs / "output", base * 8, 1, 4, conv_config(1, 1));

        Self {
            config,
            blocks,
            output,
        }
    }

    /// Shape of the score map for a single image: (1, H / 16, W / 16)
    pub fn output_shape(&self) -> (i64, i64, i64) {
        (1, self.config.img_height / 16, self.config.img_width / 16)
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `xs` - Tensor of shape (batch, channels, height, width)
    /// * `_train` - Mode flag; instance norm carries no running state
    ///
    /// # Returns
    ///
    /// Unbounded patch scores of shape (batch, 1, height / 16, width / 16)
    pub fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        let mut x = xs.shallow_clone();
        for (i, conv) in self.blocks.iter().enumerate() {
            x = conv.forward(&x);
            if i > 0 {
                x = instance_norm(&x);
            }
            x = x.maximum(&(&x * 0.2));
        }
        self.output.forward(&x.zero_pad2d(1, 0, 1, 0))
    }
}

impl ModuleT for Discriminator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        Discriminator::forward_t(self, xs, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device, Kind};

    #[test]
    fn test_discriminator_output_shape() {
        let vs = VarStore::new(Device::Cpu);
        let config = DiscriminatorConfig {
            channels: 3,
            img_height: 32,
            img_width: 16,
            base_filters: 8,
        };
        let disc = Discriminator::new(&vs.root(), config);

        let input = Tensor::randn([4, 3, 32, 16], (Kind::Float, Device::Cpu));
        let output = disc.forward_t(&input, false);

        let (c, h, w) = disc.output_shape();
        assert_eq!(output.size(), vec![4, c, h, w]);
        assert_eq!((c, h, w), (1, 2, 1));
    }
}
