//! DataLoader for batching and iterating over paired image data
//!
//! Provides batching for CycleGAN training with support for:
//! - Seeded random shuffling
//! - Drop last incomplete batch
//! - Iteration over batches, or endless cycling for sampling

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tch::{Device, Tensor};

use super::dataset::{Batch, PairedDataset};
use crate::error::{Error, Result};

/// DataLoader over a `PairedDataset`
pub struct DataLoader<D: PairedDataset> {
    /// Source of image pairs
    dataset: D,
    /// Batch size
    batch_size: usize,
    /// Whether to shuffle data each epoch
    shuffle: bool,
    /// Whether to drop the last incomplete batch
    drop_last: bool,
    /// Current indices for iteration
    indices: Vec<usize>,
    /// Current position in iteration
    current_idx: usize,
    /// Drives shuffling, augmentation and unaligned picks
    rng: StdRng,
    /// Device batches are moved to
    device: Device,
}

impl<D: PairedDataset> DataLoader<D> {
    /// Create a new DataLoader
    ///
    /// # Arguments
    ///
    /// * `dataset` - Paired image source
    /// * `batch_size` - Number of pairs per batch
    /// * `shuffle` - Whether to shuffle data each epoch
    /// * `drop_last` - Whether to drop incomplete final batch
    /// * `seed` - Seed for the loader RNG; `None` draws from entropy
    pub fn new(dataset: D, batch_size: usize, shuffle: bool, drop_last: bool, seed: Option<u64>) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }
        if dataset.is_empty() {
            return Err(Error::DataSourceExhausted("dataset is empty".to_string()));
        }

        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let indices: Vec<usize> = (0..dataset.len()).collect();

        let mut loader = Self {
            dataset,
            batch_size,
            shuffle,
            drop_last,
            indices,
            current_idx: 0,
            rng,
            device: Device::Cpu,
        };

        if shuffle {
            loader.shuffle_indices();
        }

        Ok(loader)
    }

    /// Move produced batches to `device`
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Get the number of batches per epoch
    pub fn num_batches(&self) -> usize {
        let num_samples = self.dataset.len();
        if self.drop_last {
            num_samples / self.batch_size
        } else {
            (num_samples + self.batch_size - 1) / self.batch_size
        }
    }

    /// Get total number of samples
    pub fn num_samples(&self) -> usize {
        self.dataset.len()
    }

    /// Batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Shuffle indices for a new epoch
    fn shuffle_indices(&mut self) {
        self.indices.shuffle(&mut self.rng);
    }

    /// Reset for new epoch
    pub fn reset(&mut self) {
        self.current_idx = 0;
        if self.shuffle {
            self.shuffle_indices();
        }
    }

    /// Get next batch
    ///
    /// Returns None when epoch is complete
    pub fn next_batch(&mut self) -> Option<Result<Batch>> {
        let num_samples = self.indices.len();
        let start = self.current_idx;

        if start >= num_samples {
            return None;
        }

        let end = (start + self.batch_size).min(num_samples);

        // Skip incomplete batch if drop_last
        if self.drop_last && end - start < self.batch_size {
            return None;
        }

        self.current_idx = end;
        Some(self.collect(start, end))
    }

    /// Get next batch, starting a new pass when the current one is done
    pub fn next_cycled(&mut self) -> Result<Batch> {
        if let Some(batch) = self.next_batch() {
            return batch;
        }
        self.reset();
        self.next_batch()
            .unwrap_or_else(|| Err(Error::DataSourceExhausted("loader produced no batch".to_string())))
    }

    fn collect(&mut self, start: usize, end: usize) -> Result<Batch> {
        let mut items_a = Vec::with_capacity(end - start);
        let mut items_b = Vec::with_capacity(end - start);

        for i in start..end {
            let (a, b) = self.dataset.get(self.indices[i], &mut self.rng)?;
            items_a.push(a);
            items_b.push(b);
        }

        Ok(Batch {
            a: Tensor::stack(&items_a, 0).to_device(self.device),
            b: Tensor::stack(&items_b, 0).to_device(self.device),
        })
    }

    /// Iterate over all batches (consuming iterator style)
    pub fn iter(&mut self) -> DataLoaderIter<'_, D> {
        self.reset();
        DataLoaderIter { loader: self }
    }

    /// Underlying dataset
    pub fn dataset(&self) -> &D {
        &self.dataset
    }
}

/// Iterator adapter for DataLoader
pub struct DataLoaderIter<'a, D: PairedDataset> {
    loader: &'a mut DataLoader<D>,
}

impl<'a, D: PairedDataset> Iterator for DataLoaderIter<'a, D> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.loader.next_batch()
    }
}
