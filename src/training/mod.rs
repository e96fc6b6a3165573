//! Training module for BDA semi-supervised learning
//!
//! This module provides:
//! - The training loop (`trainer`) and its checkpoint contract
//! - Complementary label synthesis for the reverse head
//! - Sliding class-distribution tracking used to de-bias pseudo labels
//! - The unsupervised consistency objective
//! - The momentum (EMA) evaluation model and evaluation metrics
//! - Iteration-level learning rate scheduling
//!
//! ## Per-iteration flow
//!
//! 1. Stack `labeled ++ weak ++ strong` and run one forward pass
//! 2. Supervised CE on the primary head, complementary CE on the reverse head
//! 3. Record detached weak-view class means of both heads in the tracker
//! 4. Add the `lambda_u`-weighted consistency terms
//! 5. Backward, optimizer step, scheduler step, EMA update
//! 6. Periodically evaluate and checkpoint

pub mod checkpoint;
pub mod complementary;
pub mod consistency;
pub mod distribution;
pub mod ema;
pub mod evaluation;
pub mod scheduler;
pub mod trainer;

// Re-export main types for convenience
pub use checkpoint::{CheckpointField, LoadReport, BEST_CHECKPOINT, LATEST_CHECKPOINT};
pub use complementary::ComplementaryLabelSampler;
pub use consistency::{consistency_loss, ConsistencyTerms};
pub use distribution::{DistributionTracker, Head};
pub use ema::MomentumEvaluationModel;
pub use evaluation::{EvalSets, Evaluator};
pub use scheduler::{IterationScheduler, LRScheduler, LrSchedule};
pub use trainer::{sgd_optimizer, BdaTrainer, TrainingState, TrainingSummary};
