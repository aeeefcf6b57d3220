//! Image preprocessing utilities
//!
//! This module provides functions for:
//! - Normalizing images to [-1, 1] range (required by the tanh generator output)
//! - Random resize-crop-flip augmentation
//! - Resizing a whole directory of images ahead of training

use rand::rngs::StdRng;
use rand::Rng;
use std::path::Path;
use tch::{vision::image, Kind, Tensor};
use tracing::info;

use crate::error::{Error, Result};

/// File extensions treated as images
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "tga"];

/// Whether `path` has an image file extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Normalize a uint8 CHW image to [-1, 1]
///
/// Formula: x_norm = (x / 255 - 0.5) / 0.5
pub fn normalize_image(img: &Tensor) -> Tensor {
    (img.to_kind(Kind::Float) / 255.0 - 0.5) / 0.5
}

/// Convert a CHW image to the requested number of channels
///
/// Grayscale is repeated to RGB, an alpha channel is dropped, and RGB is
/// averaged down when a single channel is requested.
pub fn to_channels(img: &Tensor, channels: i64) -> Result<Tensor> {
    let current = img.size()[0];
    match (current, channels) {
        (c, t) if c == t => Ok(img.shallow_clone()),
        (1, t) => Ok(img.repeat([t, 1, 1])),
        (c, 3) if c > 3 => Ok(img.narrow(0, 0, 3)),
        (c, 1) if c >= 3 => Ok(img
            .narrow(0, 0, 3)
            .to_kind(Kind::Float)
            .mean_dim(Some([0i64].as_slice()), true, Kind::Float)
            .to_kind(Kind::Uint8)),
        (c, t) => Err(Error::config(format!(
            "cannot convert a {}-channel image to {} channels",
            c, t
        ))),
    }
}

/// Random resize-crop-flip augmentation
#[derive(Debug, Clone)]
pub struct Augmentation {
    /// Output height
    pub height: i64,
    /// Output width
    pub width: i64,
    /// Output channels
    pub channels: i64,
    /// Images are first resized, keeping their aspect ratio, until both
    /// sides cover `scale` times the output size
    pub scale: f64,
    /// Flip horizontally with probability 0.5
    pub horizontal_flip: bool,
}

impl Augmentation {
    pub fn new(height: i64, width: i64, channels: i64) -> Self {
        Self {
            height,
            width,
            channels,
            scale: 1.12,
            horizontal_flip: true,
        }
    }

    /// Load an image from disk and augment it
    pub fn load(&self, path: &Path, rng: &mut StdRng) -> Result<Tensor> {
        let img = image::load(path)?;
        self.apply(&img, rng)
    }

    /// Size (height, width) an image of `src_h x src_w` is resized to before cropping
    ///
    /// For a square output this scales the shorter side to `scale * height`.
    pub fn resized_size(&self, src_h: i64, src_w: i64) -> (i64, i64) {
        let ratio = (self.height as f64 * self.scale / src_h as f64)
            .max(self.width as f64 * self.scale / src_w as f64);
        let h = ((src_h as f64 * ratio) as i64).max(self.height);
        let w = ((src_w as f64 * ratio) as i64).max(self.width);
        (h, w)
    }

    /// Augment a uint8 CHW image into a normalized float CHW tensor
    pub fn apply(&self, img: &Tensor, rng: &mut StdRng) -> Result<Tensor> {
        let img = to_channels(img, self.channels)?;

        let size = img.size();
        let (resized_h, resized_w) = self.resized_size(size[1], size[2]);
        let img = image::resize(&img, resized_w, resized_h)?;

        let top = rng.gen_range(0..=(resized_h - self.height));
        let left = rng.gen_range(0..=(resized_w - self.width));
        let mut img = img.narrow(1, top, self.height).narrow(2, left, self.width);

        if self.horizontal_flip && rng.gen::<f64>() < 0.5 {
            img = img.flip([2]);
        }

        Ok(normalize_image(&img))
    }
}

/// Resize every image in `input` to `size x size` and write it to `output`
///
/// Returns the number of images written.
pub fn resize_directory(input: &Path, output: &Path, size: i64) -> Result<usize> {
    std::fs::create_dir_all(output)?;

    let mut files: Vec<_> = std::fs::read_dir(input)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_image_file(p))
        .collect();
    files.sort();

    for (i, path) in files.iter().enumerate() {
        let img = image::load(path)?;
        let resized = image::resize(&img, size, size)?;
        if let Some(name) = path.file_name() {
            image::save(&resized, output.join(name))?;
        }

        if i % 1000 == 0 {
            info!("{} images complete", i);
        }
    }

    info!("Resized {} images into {}", files.len(), output.display());
    Ok(files.len())
}
