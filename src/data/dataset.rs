//! Paired image datasets
//!
//! A dataset yields `(a, b)` pairs of normalized CHW float tensors, one
//! image from each domain. Its length is the size of the larger domain;
//! indices wrap around the smaller one.

use rand::rngs::StdRng;
use rand::Rng;
use std::fmt;
use std::path::{Path, PathBuf};
use tch::Tensor;
use tracing::{debug, info};

use super::preprocessing::{is_image_file, Augmentation};
use crate::error::{Error, Result};
use crate::utils::HyperParameters;

/// A stacked batch of images from both domains, shape (N, C, H, W) each
#[derive(Debug)]
pub struct Batch {
    pub a: Tensor,
    pub b: Tensor,
}

impl Batch {
    /// Number of image pairs in the batch
    pub fn len(&self) -> usize {
        self.a.size()[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Random-access source of image pairs
pub trait PairedDataset {
    /// Number of pairs
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch pair `index`; `rng` drives augmentation and unaligned picks
    fn get(&self, index: usize, rng: &mut StdRng) -> Result<(Tensor, Tensor)>;
}

/// Which split of the dataset directory to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Test => write!(f, "test"),
        }
    }
}

/// Images read lazily from `{root}/{dataset}/{split}/{A,B}`
pub struct ImageFolderDataset {
    files_a: Vec<PathBuf>,
    files_b: Vec<PathBuf>,
    unaligned: bool,
    augmentation: Augmentation,
}

impl ImageFolderDataset {
    /// Index both domain directories
    ///
    /// Fails with `DataSourceExhausted` when either domain holds no images.
    pub fn new(dir_a: &Path, dir_b: &Path, unaligned: bool, augmentation: Augmentation) -> Result<Self> {
        let files_a = list_images(dir_a)?;
        let files_b = list_images(dir_b)?;

        info!(
            "Indexed {} images in {} and {} images in {}",
            files_a.len(),
            dir_a.display(),
            files_b.len(),
            dir_b.display()
        );

        Ok(Self {
            files_a,
            files_b,
            unaligned,
            augmentation,
        })
    }

    /// Dataset for `split` as laid out by the run's hyperparameters
    pub fn from_params(params: &HyperParameters, split: Split) -> Result<Self> {
        let base = Path::new(&params.data_root)
            .join(&params.dataset_name)
            .join(split.to_string());
        let augmentation = Augmentation::new(params.img_height, params.img_width, params.channels);

        Self::new(
            &base.join(&params.domain_a_dir),
            &base.join(&params.domain_b_dir),
            params.unaligned,
            augmentation,
        )
    }

    /// Number of images in each domain
    pub fn domain_sizes(&self) -> (usize, usize) {
        (self.files_a.len(), self.files_b.len())
    }
}

impl PairedDataset for ImageFolderDataset {
    fn len(&self) -> usize {
        self.files_a.len().max(self.files_b.len())
    }

    fn get(&self, index: usize, rng: &mut StdRng) -> Result<(Tensor, Tensor)> {
        let path_a = &self.files_a[index % self.files_a.len()];
        let b_index = if self.unaligned {
            rng.gen_range(0..self.files_b.len())
        } else {
            index % self.files_b.len()
        };
        let path_b = &self.files_b[b_index];

        let a = self.augmentation.load(path_a, rng)?;
        let b = self.augmentation.load(path_b, rng)?;
        Ok((a, b))
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::DataSourceExhausted(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_image_file(p))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(Error::DataSourceExhausted(format!(
            "no images found in {}",
            dir.display()
        )));
    }
    debug!("{}: {} images", dir.display(), files.len());
    Ok(files)
}

/// In-memory dataset of already normalized CHW tensors
pub struct TensorDataset {
    a: Vec<Tensor>,
    b: Vec<Tensor>,
    unaligned: bool,
}

impl TensorDataset {
    /// Build from per-domain image lists; neither may be empty
    pub fn new(a: Vec<Tensor>, b: Vec<Tensor>, unaligned: bool) -> Result<Self> {
        if a.is_empty() || b.is_empty() {
            return Err(Error::DataSourceExhausted(format!(
                "tensor dataset needs images in both domains (got {} and {})",
                a.len(),
                b.len()
            )));
        }
        Ok(Self { a, b, unaligned })
    }
}

impl PairedDataset for TensorDataset {
    fn len(&self) -> usize {
        self.a.len().max(self.b.len())
    }

    fn get(&self, index: usize, rng: &mut StdRng) -> Result<(Tensor, Tensor)> {
        let b_index = if self.unaligned {
            rng.gen_range(0..self.b.len())
        } else {
            index % self.b.len()
        };
        Ok((
            self.a[index % self.a.len()].shallow_clone(),
            self.b[b_index].shallow_clone(),
        ))
    }
}
