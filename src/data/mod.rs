//! Data module for loading and preprocessing unpaired image domains
//!
//! This module provides:
//! - Image folder and in-memory paired datasets
//! - Resize-crop-flip augmentation and normalization
//! - DataLoader for batching image pairs

mod dataset;
mod loader;
mod preprocessing;

pub use dataset::{Batch, ImageFolderDataset, PairedDataset, Split, TensorDataset};
pub use loader::{DataLoader, DataLoaderIter};
pub use preprocessing::{is_image_file, normalize_image, resize_directory, to_channels, Augmentation};
