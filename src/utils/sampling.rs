//! Visual comparison grids of held-out translations
//!
//! A grid has four rows (real A, fake B, real B, fake A), one column per
//! test image, 2 pixels of padding around every image. Each row is
//! min-max normalised on its own.

use std::path::{Path, PathBuf};
use tch::{nn::ModuleT, vision::image, Device, Kind, Tensor};
use tracing::debug;

use crate::data::{Batch, DataLoader, PairedDataset};
use crate::error::Result;
use crate::model::CycleGan;
use crate::training::Sampler;
use crate::utils::HyperParameters;

/// Padding between grid cells, in pixels
pub const GRID_PADDING: i64 = 2;

/// Scale a tensor to [0, 1] by its own min and max
pub fn min_max_normalize(xs: &Tensor) -> Tensor {
    let min = xs.min();
    let max = xs.max();
    let range = (&max - &min).clamp_min(1e-5);
    (xs - min) / range
}

/// Lay out rows of (N, C, H, W) batches as one (C, H', W') float image in [0, 1]
pub fn make_grid(rows: &[&Tensor]) -> Tensor {
    let size = rows[0].size();
    let (n, c, h, w) = (size[0], size[1], size[2], size[3]);
    let cell_h = h + GRID_PADDING;
    let cell_w = w + GRID_PADDING;

    let canvas = Tensor::zeros(
        [c, rows.len() as i64 * cell_h + GRID_PADDING, n * cell_w + GRID_PADDING],
        (Kind::Float, Device::Cpu),
    );

    for (r, row) in rows.iter().enumerate() {
        let row = min_max_normalize(&row.to_device(Device::Cpu).to_kind(Kind::Float));
        let top = r as i64 * cell_h + GRID_PADDING;
        for i in 0..n {
            let left = i * cell_w + GRID_PADDING;
            canvas
                .narrow(1, top, h)
                .narrow(2, left, w)
                .copy_(&row.get(i));
        }
    }
    canvas
}

/// Translate a test batch both ways and render the comparison grid
pub fn render_comparison(model: &CycleGan, batch: &Batch) -> Tensor {
    tch::no_grad(|| {
        let fake_b = model.g_ab.forward_t(&batch.a, false);
        let fake_a = model.g_ba.forward_t(&batch.b, false);
        make_grid(&[&batch.a, &fake_b, &batch.b, &fake_a])
    })
}

/// Writes comparison grids of held-out batches to disk
pub struct ImageGridSampler<D: PairedDataset> {
    dir: PathBuf,
    loader: DataLoader<D>,
}

impl<D: PairedDataset> ImageGridSampler<D> {
    /// Sampler writing into `{root}/{run_id}/{dataset}`
    pub fn new(root: impl AsRef<Path>, run_id: &str, dataset: &str, loader: DataLoader<D>) -> Self {
        Self {
            dir: root.as_ref().join(run_id).join(dataset),
            loader,
        }
    }

    /// Sampler for the run described by `params`
    pub fn from_params(params: &HyperParameters, loader: DataLoader<D>) -> Self {
        Self::new(&params.sample_root, params.run_id(), &params.dataset_name, loader)
    }

    /// Directory the grids are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the grid for `batches_done`
    pub fn path_for(&self, batches_done: usize) -> PathBuf {
        self.dir.join(format!("{}.png", batches_done))
    }
}

impl<D: PairedDataset> Sampler for ImageGridSampler<D> {
    fn sample(&mut self, model: &CycleGan, batches_done: usize) -> Result<()> {
        let batch = self.loader.next_cycled()?;
        let batch = Batch {
            a: batch.a.to_device(model.device),
            b: batch.b.to_device(model.device),
        };
        let grid = render_comparison(model, &batch);

        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(batches_done);
        let pixels = (grid * 255.0).clamp(0.0, 255.0).to_kind(Kind::Uint8);
        image::save(&pixels, &path)?;

        debug!("Saved sample grid {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TensorDataset;
    use crate::model::{DiscriminatorConfig, GeneratorConfig};

    fn tiny() -> CycleGan {
        CycleGan::new(
            GeneratorConfig {
                channels: 3,
                residual_blocks: 1,
                base_filters: 8,
            },
            DiscriminatorConfig {
                channels: 3,
                img_height: 16,
                img_width: 16,
                base_filters: 8,
            },
            Device::Cpu,
        )
    }

    #[test]
    fn test_min_max_normalize() {
        let xs = Tensor::from_slice(&[-3.0f32, 1.0, 5.0]);
        let out = min_max_normalize(&xs);
        assert!((out.double_value(&[0]) - 0.0).abs() < 1e-6);
        assert!((out.double_value(&[1]) - 0.5).abs() < 1e-6);
        assert!((out.double_value(&[2]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_grid_layout() {
        let opts = (Kind::Float, Device::Cpu);
        let row = Tensor::rand([5, 3, 16, 8], opts);

        let grid = make_grid(&[&row, &row, &row, &row]);

        // 4 rows of 16 + 2, 5 columns of 8 + 2, plus the outer border
        assert_eq!(grid.size(), vec![3, 4 * 18 + 2, 5 * 10 + 2]);
        assert!(grid.max().double_value(&[]) <= 1.0);
        // border stays empty
        assert_eq!(grid.narrow(1, 0, 2).abs().sum(Kind::Float).double_value(&[]), 0.0);
    }

    #[test]
    fn test_sampler_writes_named_png() {
        let opts = (Kind::Float, Device::Cpu);
        let images = |n: usize| -> Vec<Tensor> { (0..n).map(|_| Tensor::rand([3, 16, 16], opts) * 2.0 - 1.0).collect() };
        let dataset = TensorDataset::new(images(3), images(3), false).unwrap();
        let loader = DataLoader::new(dataset, 2, true, false, Some(0)).unwrap();

        let root = tempfile::tempdir().unwrap();
        let mut sampler = ImageGridSampler::new(root.path(), "run", "toy", loader);
        let model = tiny();

        sampler.sample(&model, 0).unwrap();
        sampler.sample(&model, 500).unwrap();
        sampler.sample(&model, 1000).unwrap();

        assert!(root.path().join("run/toy/0.png").exists());
        assert!(root.path().join("run/toy/1000.png").exists());

        let saved = image::load(sampler.path_for(500)).unwrap();
        assert_eq!(saved.size()[1], 4 * 18 + 2);
    }
}
