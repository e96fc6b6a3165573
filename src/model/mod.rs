//! Model module for the dual-classifier network
//!
//! This module provides:
//! - A convolutional backbone behind the `FeatureExtractor` interface
//! - The dual classifier (primary head + reverse head)
//! - Model and training-loop configuration
//!
//! ## Architecture
//!
//! A single forward pass over `labeled ++ weak ++ strong` produces primary
//! logits and features for all three views; the reverse head then consumes
//! any subset of those features.

pub mod backbone;
pub mod config;
pub mod dual;

// Re-export main types for convenience
pub use backbone::{ConvBackbone, FeatureExtractor};
pub use config::{BdaConfig, ModelConfig, ProcessRole};
pub use dual::{
    split_views, stack_views, ConvDualClassifier, DualClassifier, ReverseHead, ReverseOutput,
    ViewSplit,
};
