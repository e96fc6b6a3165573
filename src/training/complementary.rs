//! Complementary label synthesis
//!
//! For each labeled example draw a class that is guaranteed NOT to be its
//! true class. The reverse head is trained to predict these labels.

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::utils::error::{BdaError, Result};

/// Draws complementary labels uniformly over the wrong classes
#[derive(Debug, Clone)]
pub struct ComplementaryLabelSampler {
    num_classes: usize,
    rng: ChaCha8Rng,
}

impl ComplementaryLabelSampler {
    pub fn new(num_classes: usize, seed: u64) -> Result<Self> {
        if num_classes < 2 {
            return Err(BdaError::InvalidConfig(format!(
                "complementary labels need at least 2 classes, got {}",
                num_classes
            )));
        }

        Ok(Self {
            num_classes,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// One fresh complementary label per true label
    pub fn sample(&mut self, true_labels: &[usize]) -> Result<Vec<usize>> {
        true_labels
            .iter()
            .map(|&label| self.draw(label))
            .collect()
    }

    /// Same as [`sample`](Self::sample) on an integer target tensor
    pub fn sample_tensor<B: Backend>(&mut self, targets: &Tensor<B, 1, Int>) -> Result<Tensor<B, 1, Int>> {
        let data = targets.to_data();
        let labels = data
            .iter::<i64>()
            .map(|t| {
                usize::try_from(t).map_err(|_| {
                    BdaError::PreconditionViolation(format!("negative class label {}", t))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let complementary: Vec<i64> = self
            .sample(&labels)?
            .into_iter()
            .map(|c| c as i64)
            .collect();
        let len = complementary.len();

        Ok(Tensor::from_data(
            TensorData::new(complementary, [len]),
            &targets.device(),
        ))
    }

    fn draw(&mut self, label: usize) -> Result<usize> {
        if label >= self.num_classes {
            return Err(BdaError::PreconditionViolation(format!(
                "class label {} is outside 0..{}",
                label, self.num_classes
            )));
        }

        // Draw from C - 1 slots and skip over the true class.
        let draw = self.rng.gen_range(0..self.num_classes - 1);
        Ok(if draw >= label { draw + 1 } else { draw })
    }
}
