//! ResNet generator
//!
//! Translates an image from one domain to the other while keeping its
//! shape. Down-samples twice, runs a stack of residual blocks, then
//! up-samples back.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

/// Generator network configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Number of image channels
    pub channels: i64,
    /// Number of residual blocks
    pub residual_blocks: usize,
    /// Filters of the first convolution
    pub base_filters: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            channels: 3,
            residual_blocks: 9,
            base_filters: 64,
        }
    }
}

/// Convolution settings with N(0, 0.02) weights and zero bias
pub(crate) fn conv_config(stride: i64, padding: i64) -> nn::ConvConfig {
    nn::ConvConfig {
        stride,
        padding,
        ws_init: nn::Init::Randn {
            mean: 0.0,
            stdev: 0.02,
        },
        bs_init: nn::Init::Const(0.0),
        ..Default::default()
    }
}

/// Instance normalisation without affine parameters
pub(crate) fn instance_norm(xs: &Tensor) -> Tensor {
    xs.instance_norm::<Tensor>(None, None, None, None, true, 0.1, 1e-5, false)
}

#[derive(Debug)]
struct ResidualBlock {
    conv1: nn::Conv2D,
    conv2: nn::Conv2D,
}

impl ResidualBlock {
    fn new(vs: &nn::Path, features: i64) -> Self {
        Self {
            conv1: nn::conv2d(vs / "conv1", features, features, 3, conv_config(1, 0)),
            conv2: nn::conv2d(vs / "conv2", features, features, 3, conv_config(1, 0)),
        }
    }

    fn forward(&self, xs: &Tensor) -> Tensor {
        let ys = self.conv1.forward(&xs.reflection_pad2d([1, 1, 1, 1]));
        let ys = instance_norm(&ys).relu();
        let ys = self.conv2.forward(&ys.reflection_pad2d([1, 1, 1, 1]));
        xs + instance_norm(&ys)
    }
}

/// Generator network
///
/// Architecture:
/// 1. Reflection pad + 7x7 convolution, instance norm, ReLU
/// 2. Two stride-2 convolutions doubling the filters
/// 3. Residual blocks
/// 4. Two nearest-neighbour upsamplings, each followed by a 3x3 convolution
/// 5. Reflection pad + 7x7 convolution back to image channels, tanh
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    input: nn::Conv2D,
    down: Vec<nn::Conv2D>,
    blocks: Vec<ResidualBlock>,
    up: Vec<nn::Conv2D>,
    output: nn::Conv2D,
}

impl Generator {
    /// Create a new Generator network
    pub fn new(vs: &nn::Path, config: GeneratorConfig) -> Self {
        let base = config.base_filters;
        let input = nn::conv2d(vs / "input", config.channels, base, 7, conv_config(1, 0));

        let mut features = base;
        let mut down = Vec::with_capacity(2);
        for i in 0..2 {
            down.push(nn::conv2d(
                vs / "down" / i,
                features,
                features * 2,
                3,
                conv_config(2, 1),
            ));
            features *= 2;
        }

        let blocks = (0..config.residual_blocks)
            .map(|i| ResidualBlock::new(&(vs / "res" / i), features))
            .collect();

        let mut up = Vec::with_capacity(2);
        for i in 0..2 {
            up.push(nn::conv2d(
                vs / "up" / i,
                features,
                features / 2,
                3,
                conv_config(1, 1),
            ));
            features /= 2;
        }

        let output = nn::conv2d(vs / "output", features, config.channels, 7, conv_config(1, 0));

        Self {
            config,
            input,
            down,
            blocks,
            up,
            output,
        }
    }

    /// Translate a batch of images
    ///
    /// # Arguments
    ///
    /// * `xs` - Tensor of shape (batch, channels, height, width) in [-1, 1]
    /// * `_train` - Mode flag; instance norm carries no running state
    ///
    /// # Returns
    ///
    /// Tensor with the same shape as `xs`
    pub fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        let c = self.config.channels;
        let mut x = self.input.forward(&xs.reflection_pad2d([c, c, c, c]));
        x = instance_norm(&x).relu();

        for conv in &self.down {
            x = instance_norm(&conv.forward(&x)).relu();
        }

        for block in &self.blocks {
            x = block.forward(&x);
        }

        for conv in &self.up {
            let size = x.size();
            let upsampled = x.upsample_nearest2d([size[2] * 2, size[3] * 2], 2.0, 2.0);
            x = instance_norm(&conv.forward(&upsampled)).relu();
        }

        self.output
            .forward(&x.reflection_pad2d([c, c, c, c]))
            .tanh()
    }
}

impl ModuleT for Generator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        Generator::forward_t(self, xs, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device, Kind};

    #[test]
    fn test_generator_preserves_shape() {
        let vs = VarStore::new(Device::Cpu);
        let config = GeneratorConfig {
            channels: 3,
            residual_blocks: 1,
            base_filters: 8,
        };
        let gen = Generator::new(&vs.root(), config);

        let input = Tensor::rand([2, 3, 16, 16], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;
        let output = gen.forward_t(&input, true);

        assert_eq!(output.size(), vec![2, 3, 16, 16]);
        let max = output.abs().max().double_value(&[]);
        assert!(max <= 1.0);
    }

    #[test]
    fn test_residual_blocks_add_variables() {
        let small = VarStore::new(Device::Cpu);
        Generator::new(&small.root(), GeneratorConfig { residual_blocks: 1, ..Default::default() });
        let large = VarStore::new(Device::Cpu);
        Generator::new(&large.root(), GeneratorConfig { residual_blocks: 3, ..Default::default() });

        // two convolutions (weight + bias) per block
        assert_eq!(large.variables().len() - small.variables().len(), 2 * 2 * 2);
    }
}
