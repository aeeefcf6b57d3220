//! Utility module with helper functions
//!
//! This module provides:
//! - Configuration handling
//! - Device selection
//! - Checkpoint save/load utilities
//! - Sample grid rendering

mod checkpoint;
mod config;
mod device;
mod sampling;

pub use checkpoint::{CheckpointMeta, CheckpointStore};
pub use config::{HyperParameterConfig, HyperParameters};
pub use device::resolve_device;
pub use sampling::{make_grid, min_max_normalize, render_comparison, ImageGridSampler, GRID_PADDING};
