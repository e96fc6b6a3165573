//! Items, batches and Burn batchers
//!
//! - `ImageItem` / `LabeledBatcher`: labeled training data and evaluation sets
//! - `UnlabeledItem` / `UnlabeledBatcher`: paired weak/strong views; the
//!   hidden label is only turned into a tensor by `UnlabeledEvalBatcher`

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// A single labeled image as a flattened CHW float array
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageItem {
    pub image: Vec<f32>,
    pub label: usize,
}

/// One unlabeled sample seen through a weak and a strong augmentation.
///
/// `label` is ground truth kept for diagnostics only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnlabeledItem {
    pub weak: Vec<f32>,
    pub strong: Vec<f32>,
    pub label: usize,
}

/// Labeled training batch
#[derive(Clone, Debug)]
pub struct LabeledBatch<B: Backend> {
    /// Images with shape [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Unlabeled training batch; `weak` and `strong` correspond row by row
#[derive(Clone, Debug)]
pub struct UnlabeledBatch<B: Backend> {
    pub weak: Tensor<B, 4>,
    pub strong: Tensor<B, 4>,
}

/// Weak views of unlabeled data with their hidden labels, for pseudo-label accuracy
#[derive(Clone, Debug)]
pub struct UnlabeledEvalBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// Shape of the images a batcher assembles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn square(channels: usize, size: usize) -> Self {
        Self {
            channels,
            height: size,
            width: size,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.channels * self.height * self.width
    }
}

fn images_tensor<B: Backend>(
    shape: ImageShape,
    batch_size: usize,
    data: Vec<f32>,
    device: &B::Device,
) -> Tensor<B, 4> {
    Tensor::<B, 4>::from_floats(
        TensorData::new(data, [batch_size, shape.channels, shape.height, shape.width]),
        device,
    )
}

fn targets_tensor<B: Backend>(labels: Vec<i64>, device: &B::Device) -> Tensor<B, 1, Int> {
    let batch_size = labels.len();
    Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device)
}

/// Batcher for labeled items
#[derive(Clone, Copy, Debug)]
pub struct LabeledBatcher {
    shape: ImageShape,
}

impl LabeledBatcher {
    pub fn new(shape: ImageShape) -> Self {
        Self { shape }
    }
}

impl<B: Backend> Batcher<B, ImageItem, LabeledBatch<B>> for LabeledBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> LabeledBatch<B> {
        let batch_size = items.len();
        let mut images = Vec::with_capacity(batch_size * self.shape.num_elements());
        let mut labels = Vec::with_capacity(batch_size);

        for item in items {
            images.extend(item.image);
            labels.push(item.label as i64);
        }

        LabeledBatch {
            images: images_tensor(self.shape, batch_size, images, device),
            targets: targets_tensor(labels, device),
        }
    }
}

/// Batcher for weak/strong unlabeled pairs
#[derive(Clone, Copy, Debug)]
pub struct UnlabeledBatcher {
    shape: ImageShape,
}

impl UnlabeledBatcher {
    pub fn new(shape: ImageShape) -> Self {
        Self { shape }
    }
}

impl<B: Backend> Batcher<B, UnlabeledItem, UnlabeledBatch<B>> for UnlabeledBatcher {
    fn batch(&self, items: Vec<UnlabeledItem>, device: &B::Device) -> UnlabeledBatch<B> {
        let batch_size = items.len();
        let mut weak = Vec::with_capacity(batch_size * self.shape.num_elements());
        let mut strong = Vec::with_capacity(batch_size * self.shape.num_elements());

        for item in items {
            weak.extend(item.weak);
            strong.extend(item.strong);
        }

        UnlabeledBatch {
            weak: images_tensor(self.shape, batch_size, weak, device),
            strong: images_tensor(self.shape, batch_size, strong, device),
        }
    }
}

/// Batcher exposing the hidden labels of unlabeled items
#[derive(Clone, Copy, Debug)]
pub struct UnlabeledEvalBatcher {
    shape: ImageShape,
}

impl UnlabeledEvalBatcher {
    pub fn new(shape: ImageShape) -> Self {
        Self { shape }
    }
}

impl<B: Backend> Batcher<B, UnlabeledItem, UnlabeledEvalBatch<B>> for UnlabeledEvalBatcher {
    fn batch(&self, items: Vec<UnlabeledItem>, device: &B::Device) -> UnlabeledEvalBatch<B> {
        let batch_size = items.len();
        let mut images = Vec::with_capacity(batch_size * self.shape.num_elements());
        let mut labels = Vec::with_capacity(batch_size);

        for item in items {
            images.extend(item.weak);
            labels.push(item.label as i64);
        }

        UnlabeledEvalBatch {
            images: images_tensor(self.shape, batch_size, images, device),
            targets: targets_tensor(labels, device),
        }
    }
}
