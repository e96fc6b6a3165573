//! Sliding class-distribution tracker
//!
//! Keeps the last `capacity` per-batch mean probability vectors of each
//! head in a ring. Both rings share one cursor, so slot `k` of the primary
//! ring and slot `k` of the reverse ring always come from the same batch.

use burn::tensor::{backend::Backend, Tensor};

use crate::utils::error::{BdaError, Result};

/// Which classifier head a ring belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Head {
    Primary,
    Reverse,
}

#[derive(Debug, Clone)]
pub struct DistributionTracker<B: Backend> {
    primary: Vec<Tensor<B, 2>>,
    reverse: Vec<Tensor<B, 2>>,
    cursor: usize,
    num_classes: usize,
}

impl<B: Backend> DistributionTracker<B> {
    /// Both rings start with the uniform distribution `1/C` in every slot
    pub fn new(capacity: usize, num_classes: usize, device: &B::Device) -> Result<Self> {
        if capacity == 0 || num_classes == 0 {
            return Err(BdaError::InvalidConfig(format!(
                "distribution tracker needs a positive capacity and class count, got {} x {}",
                capacity, num_classes
            )));
        }

        let uniform = Tensor::<B, 2>::ones([1, num_classes], device) / num_classes as f64;
        Ok(Self {
            primary: vec![uniform.clone(); capacity],
            reverse: vec![uniform; capacity],
            cursor: 0,
            num_classes,
        })
    }

    pub fn capacity(&self) -> usize {
        self.primary.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Write both heads at the cursor, then advance it.
    ///
    /// Nothing is written unless both vectors have the tracker's width.
    pub fn record(&mut self, primary_mean: Tensor<B, 1>, reverse_mean: Tensor<B, 1>) -> Result<()> {
        self.check_width(&primary_mean)?;
        self.check_width(&reverse_mean)?;

        self.update(Head::Primary, primary_mean)?;
        self.update(Head::Reverse, reverse_mean)?;
        self.advance();
        Ok(())
    }

    /// Overwrite one head's slot at the cursor without advancing
    pub(crate) fn update(&mut self, head: Head, mean: Tensor<B, 1>) -> Result<()> {
        self.check_width(&mean)?;

        let row = mean.detach().reshape([1, self.num_classes]);
        let cursor = self.cursor;
        self.ring_mut(head)[cursor] = row;
        Ok(())
    }

    /// Move the shared cursor to the next slot
    pub(crate) fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.capacity();
    }

    fn check_width(&self, mean: &Tensor<B, 1>) -> Result<()> {
        let [len] = mean.dims();
        if len != self.num_classes {
            return Err(BdaError::PreconditionViolation(format!(
                "distribution vector has {} entries, tracker expects {}",
                len, self.num_classes
            )));
        }
        Ok(())
    }

    /// Full ring, `[capacity, num_classes]`
    pub fn snapshot(&self, head: Head) -> Tensor<B, 2> {
        Tensor::cat(self.ring(head).to_vec(), 0)
    }

    /// Column mean of the ring, `[num_classes]`
    pub fn mean(&self, head: Head) -> Tensor<B, 1> {
        self.snapshot(head)
            .mean_dim(0)
            .reshape([self.num_classes])
    }

    fn ring(&self, head: Head) -> &[Tensor<B, 2>] {
        match head {
            Head::Primary => &self.primary,
            Head::Reverse => &self.reverse,
        }
    }

    fn ring_mut(&mut self, head: Head) -> &mut Vec<Tensor<B, 2>> {
        match head {
            Head::Primary => &mut self.primary,
            Head::Reverse => &mut self.reverse,
        }
    }
}
