//! Dual-classifier network
//!
//! One feature pass feeds two heads: the primary head predicts the class,
//! the reverse head is trained on complementary labels and therefore
//! learns to put little mass on the true class.

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use super::backbone::{ConvBackbone, FeatureExtractor};
use super::config::ModelConfig;
use crate::utils::error::{BdaError, Result};

/// Output of the reverse head
#[derive(Debug, Clone)]
pub struct ReverseOutput<B: Backend> {
    /// Raw scores, `[batch, num_classes]`
    pub logits: Tensor<B, 2>,
    /// Softmax of `logits`
    pub probs: Tensor<B, 2>,
}

/// Linear classifier over backbone features
#[derive(Module, Debug)]
pub struct ReverseHead<B: Backend> {
    pub fc: Linear<B>,
}

impl<B: Backend> ReverseHead<B> {
    pub fn new(feature_dim: usize, num_classes: usize, device: &B::Device) -> Self {
        Self {
            fc: LinearConfig::new(feature_dim, num_classes).init(device),
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> ReverseOutput<B> {
        let logits = self.fc.forward(features);
        let probs = softmax(logits.clone(), 1);
        ReverseOutput { logits, probs }
    }
}

/// Feature extractor `E` plus primary and reverse heads.
///
/// `E` is any [`FeatureExtractor`] that is also a Burn module; the heads
/// only rely on its `output_dim`.
#[derive(Module, Debug)]
pub struct DualClassifier<B: Backend, E> {
    pub backbone: E,
    pub dropout: Dropout,
    pub primary: Linear<B>,
    pub reverse: ReverseHead<B>,
    num_classes: usize,
}

/// The dual classifier on the stock convolutional backbone
pub type ConvDualClassifier<B> = DualClassifier<B, ConvBackbone<B>>;

impl<B: Backend> DualClassifier<B, ConvBackbone<B>> {
    /// Build the network from a validated configuration
    pub fn new(config: &ModelConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;

        let backbone = ConvBackbone::new(config, device);
        Self::with_extractor(backbone, config.num_classes, config.dropout_rate, device)
    }
}

impl<B: Backend, E: FeatureExtractor<B>> DualClassifier<B, E> {
    /// Put both heads on top of an existing extractor
    pub fn with_extractor(
        backbone: E,
        num_classes: usize,
        dropout_rate: f64,
        device: &B::Device,
    ) -> Result<Self> {
        if num_classes < 2 {
            return Err(BdaError::InvalidConfig(format!(
                "a dual classifier needs at least 2 classes, got {}",
                num_classes
            )));
        }
        if !(0.0..1.0).contains(&dropout_rate) {
            return Err(BdaError::InvalidConfig(format!(
                "dropout rate must be in [0, 1), got {}",
                dropout_rate
            )));
        }

        let feature_dim = backbone.output_dim();
        Ok(Self {
            backbone,
            dropout: DropoutConfig::new(dropout_rate).init(),
            primary: LinearConfig::new(feature_dim, num_classes).init(device),
            reverse: ReverseHead::new(feature_dim, num_classes, device),
            num_classes,
        })
    }

    /// Primary logits and the feature matrix for a (possibly stacked) batch
    pub fn forward(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let features = self.backbone.extract(images);
        let logits = self.primary.forward(self.dropout.forward(features.clone()));
        (logits, features)
    }

    /// Reverse-head logits and probabilities for any rows of a feature matrix
    pub fn forward_reverse(&self, features: Tensor<B, 2>) -> ReverseOutput<B> {
        self.reverse.forward(features)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Stack `labeled ++ weak ++ strong` along the batch axis.
///
/// Returns the stacked tensor together with the labeled and unlabeled
/// sub-batch sizes. Weak and strong views must pair up one to one.
pub fn stack_views<B: Backend>(
    labeled: Tensor<B, 4>,
    weak: Tensor<B, 4>,
    strong: Tensor<B, 4>,
) -> Result<(Tensor<B, 4>, usize, usize)> {
    let num_lb = labeled.dims()[0];
    let num_ulb = weak.dims()[0];
    let num_strong = strong.dims()[0];

    if num_ulb != num_strong {
        return Err(BdaError::PreconditionViolation(format!(
            "weak view has {} samples but strong view has {}",
            num_ulb, num_strong
        )));
    }

    Ok((Tensor::cat(vec![labeled, weak, strong], 0), num_lb, num_ulb))
}

/// Per-view slices of a tensor produced from a stacked batch
#[derive(Debug, Clone)]
pub struct ViewSplit<B: Backend> {
    pub labeled: Tensor<B, 2>,
    pub weak: Tensor<B, 2>,
    pub strong: Tensor<B, 2>,
}

/// Undo [`stack_views`] on a `[num_lb + 2 * num_ulb, _]` tensor
pub fn split_views<B: Backend>(tensor: Tensor<B, 2>, num_lb: usize, num_ulb: usize) -> ViewSplit<B> {
    let [rows, cols] = tensor.dims();
    debug_assert_eq!(rows, num_lb + 2 * num_ulb);

    ViewSplit {
        labeled: tensor.clone().slice([0..num_lb, 0..cols]),
        weak: tensor
            .clone()
            .slice([num_lb..num_lb + num_ulb, 0..cols]),
        strong: tensor.slice([num_lb + num_ulb..rows, 0..cols]),
    }
}
