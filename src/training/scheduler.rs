//! Learning Rate Scheduler Module
//!
//! Iteration-level learning rate policies. The trainer steps the schedule
//! exactly once per training iteration and its position is checkpointed.

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

/// Learning rate as a function of the iteration counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LRScheduler {
    /// Constant learning rate (no scheduling)
    Constant { lr: f64 },

    /// Multiply by `decay_factor` at each listed iteration
    StepDecay {
        initial_lr: f64,
        decay_factor: f64,
        milestones: Vec<usize>,
    },

    /// Cosine annealing from `initial_lr` to `min_lr` over `total_steps`
    CosineAnnealing {
        initial_lr: f64,
        min_lr: f64,
        total_steps: usize,
    },

    /// Linear warmup followed by cosine annealing
    WarmupCosine {
        initial_lr: f64,
        min_lr: f64,
        warmup_steps: usize,
        total_steps: usize,
    },
}

impl LRScheduler {
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    pub fn step_decay(initial_lr: f64, decay_factor: f64, milestones: Vec<usize>) -> Self {
        Self::StepDecay {
            initial_lr,
            decay_factor,
            milestones,
        }
    }

    pub fn cosine_annealing(initial_lr: f64, min_lr: f64, total_steps: usize) -> Self {
        Self::CosineAnnealing {
            initial_lr,
            min_lr,
            total_steps,
        }
    }

    pub fn warmup_cosine(
        initial_lr: f64,
        min_lr: f64,
        warmup_steps: usize,
        total_steps: usize,
    ) -> Self {
        Self::WarmupCosine {
            initial_lr,
            min_lr,
            warmup_steps,
            total_steps,
        }
    }

    /// Learning rate at iteration `step`
    pub fn get_lr(&self, step: usize) -> f64 {
        match self {
            Self::Constant { lr } => *lr,

            Self::StepDecay {
                initial_lr,
                decay_factor,
                milestones,
            } => {
                let passed = milestones.iter().filter(|&&m| step >= m).count();
                initial_lr * decay_factor.powi(passed as i32)
            }

            Self::CosineAnnealing {
                initial_lr,
                min_lr,
                total_steps,
            } => cosine(*initial_lr, *min_lr, step, *total_steps),

            Self::WarmupCosine {
                initial_lr,
                min_lr,
                warmup_steps,
                total_steps,
            } => {
                if step < *warmup_steps {
                    initial_lr * (step as f64 + 1.0) / *warmup_steps as f64
                } else {
                    cosine(
                        *initial_lr,
                        *min_lr,
                        step - warmup_steps,
                        total_steps.saturating_sub(*warmup_steps),
                    )
                }
            }
        }
    }

    /// Get a description of the scheduler
    pub fn description(&self) -> String {
        match self {
            Self::Constant { lr } => format!("Constant LR: {:.6}", lr),
            Self::StepDecay {
                initial_lr,
                decay_factor,
                milestones,
            } => format!(
                "Step Decay: initial={:.6}, factor={}, milestones={:?}",
                initial_lr, decay_factor, milestones
            ),
            Self::CosineAnnealing {
                initial_lr,
                min_lr,
                total_steps,
            } => format!(
                "Cosine Annealing: initial={:.6}, min={:.6}, steps={}",
                initial_lr, min_lr, total_steps
            ),
            Self::WarmupCosine {
                initial_lr,
                warmup_steps,
                total_steps,
                ..
            } => format!(
                "Warmup + Cosine: initial={:.6}, warmup={}, total={}",
                initial_lr, warmup_steps, total_steps
            ),
        }
    }
}

fn cosine(initial_lr: f64, min_lr: f64, step: usize, total_steps: usize) -> f64 {
    if total_steps == 0 {
        return min_lr;
    }
    let progress = (step as f64 / total_steps as f64).min(1.0);
    let cosine_factor = (1.0 + (std::f64::consts::PI * progress).cos()) / 2.0;
    min_lr + (initial_lr - min_lr) * cosine_factor
}

/// A stateful schedule the trainer can step and checkpoint
pub trait LrSchedule {
    /// Advance by one iteration and return the learning rate to use for it
    fn step(&mut self) -> f64;

    /// Learning rate of the most recent step
    fn current_lr(&self) -> f64;

    /// Serialized position of the schedule
    fn state(&self) -> Result<serde_json::Value>;

    /// Restore a position produced by [`LrSchedule::state`]
    fn load_state(&mut self, state: serde_json::Value) -> Result<()>;
}

/// An [`LRScheduler`] policy plus the number of steps taken so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationScheduler {
    pub policy: LRScheduler,
    pub steps: usize,
}

impl IterationScheduler {
    pub fn new(policy: LRScheduler) -> Self {
        Self { policy, steps: 0 }
    }
}

impl LrSchedule for IterationScheduler {
    fn step(&mut self) -> f64 {
        let lr = self.policy.get_lr(self.steps);
        self.steps += 1;
        lr
    }

    fn current_lr(&self) -> f64 {
        self.policy.get_lr(self.steps.saturating_sub(1))
    }

    fn state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_state(&mut self, state: serde_json::Value) -> Result<()> {
        *self = serde_json::from_value(state)?;
        Ok(())
    }
}
