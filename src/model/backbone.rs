//! Convolutional feature extractor
//!
//! The training core treats the backbone as opaque: anything implementing
//! [`FeatureExtractor`] maps an image batch to a `[batch, feature_dim]`
//! feature matrix. `ConvBackbone` is the stock implementation.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::config::ModelConfig;

/// Fixed interface between a backbone and the classifier heads.
///
/// Implementations must process every sample independently at inference
/// time, so that a stacked batch splits back into per-view outputs.
pub trait FeatureExtractor<B: Backend> {
    /// Map `[batch, channels, height, width]` images to `[batch, feature_dim]`
    fn extract(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Width of the produced feature vectors
    fn output_dim(&self) -> usize;
}

/// Conv2d, BatchNorm, ReLU and a 2x2 MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Stack of conv blocks, global average pooling and a projection to the
/// feature width.
#[derive(Module, Debug)]
pub struct ConvBackbone<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub global_pool: AdaptiveAvgPool2d,
    pub projection: Linear<B>,
    pub relu: Relu,
    feature_dim: usize,
}

impl<B: Backend> ConvBackbone<B> {
    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(config.conv_filters.len());
        let mut in_channels = config.input_channels;
        for &out_channels in &config.conv_filters {
            blocks.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }

        Self {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            projection: LinearConfig::new(in_channels, config.feature_dim).init(device),
            relu: Relu::new(),
            feature_dim: config.feature_dim,
        }
    }
}

impl<B: Backend> FeatureExtractor<B> for ConvBackbone<B> {
    fn extract(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        self.relu.forward(self.projection.forward(x))
    }

    fn output_dim(&self) -> usize {
        self.feature_dim
    }
}

/// Flattens each image and projects it linearly; a second extractor for
/// exercising the classifier and trainer away from `ConvBackbone`
#[cfg(test)]
#[derive(Module, Debug)]
pub(crate) struct FlattenExtractor<B: Backend> {
    pub projection: Linear<B>,
    feature_dim: usize,
}

#[cfg(test)]
impl<B: Backend> FlattenExtractor<B> {
    pub fn new(input_len: usize, feature_dim: usize, device: &B::Device) -> Self {
        Self {
            projection: LinearConfig::new(input_len, feature_dim).init(device),
            feature_dim,
        }
    }
}

#[cfg(test)]
impl<B: Backend> FeatureExtractor<B> for FlattenExtractor<B> {
    fn extract(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, height, width] = images.dims();
        self.projection
            .forward(images.reshape([batch_size, channels * height * width]))
    }

    fn output_dim(&self) -> usize {
        self.feature_dim
    }
}
