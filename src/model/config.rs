//! Model and Training Configuration Module
//!
//! Defines configuration structures for the dual-classifier network and
//! for the BDA training loop.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::training::scheduler::LRScheduler;
use crate::utils::error::{BdaError, Result};

/// Configuration for the backbone and both classifier heads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of output classes, shared by the primary and reverse heads
    pub num_classes: usize,

    /// Number of input channels (3 for RGB)
    pub input_channels: usize,

    /// Number of filters in each convolutional block
    pub conv_filters: Vec<usize>,

    /// Width of the feature vector both heads consume
    pub feature_dim: usize,

    /// Dropout applied to features before the primary head
    pub dropout_rate: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_classes: 10,
            input_channels: 3,
            conv_filters: vec![32, 64, 128],
            feature_dim: 128,
            dropout_rate: 0.0,
        }
    }
}

impl ModelConfig {
    /// Create a model configuration for `num_classes` with default widths
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Default::default()
        }
    }

    /// A very small network, used by tests and the synthetic demo
    pub fn tiny(num_classes: usize) -> Self {
        Self {
            num_classes,
            input_channels: 1,
            conv_filters: vec![4],
            feature_dim: 8,
            dropout_rate: 0.0,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_classes < 2 {
            return Err(BdaError::InvalidConfig(
                "num_classes must be at least 2 for complementary labels".to_string(),
            ));
        }

        if self.input_channels == 0 {
            return Err(BdaError::InvalidConfig(
                "input_channels must be greater than 0".to_string(),
            ));
        }

        if self.conv_filters.is_empty() || self.conv_filters.contains(&0) {
            return Err(BdaError::InvalidConfig(
                "conv_filters must list at least one non-zero width".to_string(),
            ));
        }

        if self.feature_dim == 0 {
            return Err(BdaError::InvalidConfig(
                "feature_dim must be greater than 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(BdaError::InvalidConfig(
                "dropout_rate must be in range [0.0, 1.0)".to_string(),
            ));
        }

        Ok(())
    }
}

/// Rank and world size of this process in a data-parallel job.
///
/// Gradient synchronisation belongs to the optimizer; the core only uses
/// the role to decide who writes checkpoints and metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessRole {
    pub rank: usize,
    pub world_size: usize,
}

impl Default for ProcessRole {
    fn default() -> Self {
        Self {
            rank: 0,
            world_size: 1,
        }
    }
}

impl ProcessRole {
    pub fn new(rank: usize, world_size: usize) -> Self {
        Self { rank, world_size }
    }

    /// Only the first process persists state
    pub fn is_primary(&self) -> bool {
        self.world_size <= 1 || self.rank == 0
    }
}

/// Configuration of the BDA training loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BdaConfig {
    /// Number of classes (must match the model)
    pub num_classes: usize,

    /// Decay of the momentum evaluation model, in [0, 1)
    pub ema_momentum: f64,

    /// Weight of both unsupervised consistency terms
    pub lambda_u: f64,

    /// Training stops once the iteration counter exceeds this value
    pub num_train_iter: usize,

    /// Evaluate every N iterations
    pub num_eval_iter: usize,

    /// Past this iteration the evaluation period becomes `relaxed_eval_interval`
    pub eval_relax_after: usize,

    /// Evaluation period used in very long runs
    pub relaxed_eval_interval: usize,

    /// Number of per-batch class distributions kept by the tracker
    pub distribution_window: usize,

    /// Evaluate with the momentum model instead of the training model
    pub use_momentum_eval: bool,

    /// Request reduced-precision training (handled by the backend element type)
    pub mixed_precision: bool,

    /// Weight decay (L2 regularization)
    pub weight_decay: f64,

    /// SGD momentum
    pub sgd_momentum: f64,

    /// Use Nesterov momentum
    pub nesterov: bool,

    /// Learning rate policy, stepped once per iteration; the only source of
    /// the rate handed to the optimizer
    pub scheduler: LRScheduler,

    /// Random seed for complementary labels and data
    pub seed: u64,

    /// Root directory for checkpoints
    pub checkpoint_dir: String,

    /// Run name; checkpoints go to `checkpoint_dir/save_name`
    pub save_name: String,

    /// Emit an iteration status line every N iterations
    pub log_interval: usize,

    /// Position of this process in a data-parallel job
    pub process: ProcessRole,
}

impl Default for BdaConfig {
    fn default() -> Self {
        let num_train_iter = 1 << 20;
        Self {
            num_classes: 10,
            ema_momentum: 0.999,
            lambda_u: 1.0,
            num_train_iter,
            num_eval_iter: 5000,
            eval_relax_after: 1 << 19,
            relaxed_eval_interval: 1000,
            distribution_window: 128,
            use_momentum_eval: true,
            mixed_precision: false,
            weight_decay: 5e-4,
            sgd_momentum: 0.9,
            nesterov: true,
            scheduler: LRScheduler::cosine_annealing(0.03, 0.0, num_train_iter),
            seed: 0,
            checkpoint_dir: "output/checkpoints".to_string(),
            save_name: "bda".to_string(),
            log_interval: 50,
            process: ProcessRole::default(),
        }
    }
}

impl BdaConfig {
    /// Short run for debugging and the synthetic demo
    pub fn debug(num_classes: usize) -> Self {
        let num_train_iter = 200;
        Self {
            num_classes,
            ema_momentum: 0.99,
            num_train_iter,
            num_eval_iter: 50,
            distribution_window: 16,
            scheduler: LRScheduler::warmup_cosine(0.01, 1e-4, 10, num_train_iter),
            checkpoint_dir: "output/debug_checkpoints".to_string(),
            log_interval: 10,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_classes < 2 {
            return Err(BdaError::InvalidConfig(
                "num_classes must be at least 2 for complementary labels".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.ema_momentum) {
            return Err(BdaError::InvalidConfig(format!(
                "ema_momentum must be in [0, 1), got {}",
                self.ema_momentum
            )));
        }

        if self.lambda_u < 0.0 {
            return Err(BdaError::InvalidConfig(
                "lambda_u must be non-negative".to_string(),
            ));
        }

        if self.num_eval_iter == 0 || self.relaxed_eval_interval == 0 {
            return Err(BdaError::InvalidConfig(
                "evaluation periods must be greater than 0".to_string(),
            ));
        }

        if self.distribution_window == 0 {
            return Err(BdaError::InvalidConfig(
                "distribution_window must be greater than 0".to_string(),
            ));
        }

        if self.process.world_size == 0 || self.process.rank >= self.process.world_size {
            return Err(BdaError::InvalidConfig(format!(
                "rank {} is outside world size {}",
                self.process.rank, self.process.world_size
            )));
        }

        Ok(())
    }

    /// Directory holding this run's checkpoints
    pub fn save_path(&self) -> std::path::PathBuf {
        Path::new(&self.checkpoint_dir).join(&self.save_name)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BdaError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
