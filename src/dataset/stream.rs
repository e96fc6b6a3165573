//! Lazy batch sources for the training loop
//!
//! Batches are assembled on demand so that only the current batch lives on
//! the device.

use std::marker::PhantomData;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Iterator of batches drawn from a dataset in shuffled order.
///
/// With `endless` set, the order is reshuffled and the pass restarts every
/// time the dataset is exhausted; otherwise the stream ends after one pass.
/// A trailing partial batch is dropped.
pub struct BatchStream<B: Backend, D, T, I, O> {
    dataset: D,
    batcher: T,
    batch_size: usize,
    device: B::Device,
    rng: ChaCha8Rng,
    order: Vec<usize>,
    position: usize,
    endless: bool,
    _marker: PhantomData<(I, O)>,
}

impl<B, D, T, I, O> BatchStream<B, D, T, I, O>
where
    B: Backend,
    D: Dataset<I>,
    T: Batcher<B, I, O>,
{
    pub fn new(dataset: D, batcher: T, batch_size: usize, seed: u64, device: B::Device) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        order.shuffle(&mut rng);

        Self {
            dataset,
            batcher,
            batch_size: batch_size.max(1),
            device,
            rng,
            order,
            position: 0,
            endless: false,
            _marker: PhantomData,
        }
    }

    /// Restart with a fresh shuffle whenever a pass completes
    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }

    /// Number of full batches in one pass
    pub fn batches_per_pass(&self) -> usize {
        self.order.len() / self.batch_size
    }
}

impl<B, D, T, I, O> Iterator for BatchStream<B, D, T, I, O>
where
    B: Backend,
    D: Dataset<I>,
    T: Batcher<B, I, O>,
{
    type Item = O;

    fn next(&mut self) -> Option<O> {
        if self.batches_per_pass() == 0 {
            return None;
        }

        if self.position + self.batch_size > self.order.len() {
            if !self.endless {
                return None;
            }
            self.order.shuffle(&mut self.rng);
            self.position = 0;
        }

        let items: Vec<I> = self.order[self.position..self.position + self.batch_size]
            .iter()
            .filter_map(|&i| self.dataset.get(i))
            .collect();
        self.position += self.batch_size;

        Some(self.batcher.batch(items, &self.device))
    }
}

/// Re-iterate a finite set of prepared batches forever
pub fn cycle_batches<T: Clone>(batches: Vec<T>) -> impl Iterator<Item = T> {
    batches.into_iter().cycle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::batch::{ImageItem, ImageShape, LabeledBatch, LabeledBatcher};
    use burn::data::dataset::InMemDataset;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn dataset(len: usize) -> InMemDataset<ImageItem> {
        InMemDataset::new(
            (0..len)
                .map(|i| ImageItem {
                    image: vec![i as f32],
                    label: i % 2,
                })
                .collect(),
        )
    }

    #[test]
    fn test_single_pass_drops_partial_batch() {
        let stream: BatchStream<TestBackend, _, _, _, LabeledBatch<TestBackend>> = BatchStream::new(
            dataset(7),
            LabeledBatcher::new(ImageShape::square(1, 1)),
            3,
            0,
            Default::default(),
        );

        let batches: Vec<_> = stream.collect();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.images.dims()[0] == 3));
    }

    #[test]
    fn test_single_pass_visits_each_item_once() {
        let stream: BatchStream<TestBackend, _, _, _, LabeledBatch<TestBackend>> = BatchStream::new(
            dataset(6),
            LabeledBatcher::new(ImageShape::square(1, 1)),
            2,
            9,
            Default::default(),
        );

        let mut seen: Vec<f32> = stream
            .flat_map(|b| b.images.into_data().to_vec::<f32>().unwrap())
            .collect();
        seen.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_endless_stream_keeps_going() {
        let stream: BatchStream<TestBackend, _, _, _, LabeledBatch<TestBackend>> = BatchStream::new(
            dataset(4),
            LabeledBatcher::new(ImageShape::square(1, 1)),
            4,
            1,
            Default::default(),
        )
        .endless();

        assert_eq!(stream.take(5).count(), 5);
    }

    #[test]
    fn test_empty_dataset_yields_nothing() {
        let stream: BatchStream<TestBackend, _, _, _, LabeledBatch<TestBackend>> = BatchStream::new(
            dataset(1),
            LabeledBatcher::new(ImageShape::square(1, 1)),
            2,
            0,
            Default::default(),
        )
        .endless();

        assert_eq!(stream.count(), 0);
    }

    #[test]
    fn test_cycle_batches() {
        let cycled: Vec<u8> = cycle_batches(vec![1, 2]).take(5).collect();
        assert_eq!(cycled, vec![1, 2, 1, 2, 1]);
    }
}
