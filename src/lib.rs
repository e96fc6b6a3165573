//! # BDA Semi-Supervised Learning
//!
//! A Rust library for semi-supervised image classification that trains a
//! primary classifier together with a reverse (complementary-label)
//! classifier, built on the Burn framework.
//!
//! ## Features
//!
//! - **Dual classifier**: one backbone pass feeds a primary head and a reverse head
//! - **Complementary labels** regenerated every step for the reverse head
//! - **Distribution de-biasing** of pseudo labels with a sliding class-marginal window
//! - **Momentum evaluation model** kept on the gradient-free backend
//! - **Tolerant checkpoints**: each field restores independently
//!
//! ## Modules
//!
//! - `dataset`: Batch types, Burn batchers, lazy batch streams and synthetic data
//! - `model`: Backbone, dual classifier and configuration
//! - `training`: Training loop, consistency objective, EMA, evaluation, scheduling
//! - `utils`: Logging, metrics sinks and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bda_ssl::backend::{default_device, TrainingBackend};
//! use bda_ssl::model::{BdaConfig, ConvBackbone, ConvDualClassifier, ModelConfig};
//! use bda_ssl::training::{sgd_optimizer, BdaTrainer, IterationScheduler};
//!
//! let device = default_device();
//! let config = BdaConfig::debug(4);
//! let model = ConvDualClassifier::<TrainingBackend>::new(&ModelConfig::tiny(4), &device)?;
//! let optimizer = sgd_optimizer::<TrainingBackend, ConvBackbone<TrainingBackend>>(&config);
//! let scheduler = IterationScheduler::new(config.scheduler.clone());
//! let mut trainer = BdaTrainer::new(model, optimizer, scheduler, config, device)?;
//! // trainer.fit(labeled, unlabeled, &eval_sets, &mut sink)?;
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{LabeledBatch, UnlabeledBatch, UnlabeledEvalBatch};
pub use model::{BdaConfig, ConvDualClassifier, DualClassifier, ModelConfig, ProcessRole};
pub use training::{BdaTrainer, EvalSets, TrainingSummary};
pub use utils::error::{BdaError, Result};
pub use utils::metrics::{MetricsRecord, MetricsSink};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
