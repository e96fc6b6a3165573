//! Dataset module: batch types, batchers and batch sources
//!
//! The training core only sees batches. This module provides:
//! - Labeled and unlabeled (weak/strong) batch types with Burn batchers
//! - Lazy shuffled batch streams over any Burn `Dataset`
//! - A synthetic in-memory dataset for demos and tests

pub mod batch;
pub mod stream;
pub mod synthetic;

// Re-export main types for convenience
pub use batch::{
    ImageItem, ImageShape, LabeledBatch, LabeledBatcher, UnlabeledBatch, UnlabeledBatcher,
    UnlabeledEvalBatch, UnlabeledEvalBatcher, UnlabeledItem,
};
pub use stream::{cycle_batches, BatchStream};
pub use synthetic::{generate as generate_synthetic, SyntheticConfig, SyntheticSplits};
