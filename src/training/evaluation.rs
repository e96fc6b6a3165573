//! Evaluation of the dual classifier
//!
//! Held-out labeled data gives loss and accuracy of the primary head plus
//! the arg-min accuracy of the reverse head. Unlabeled data with hidden
//! ground truth gives pseudo-label diagnostics.

use burn::{
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};

use crate::dataset::{LabeledBatch, UnlabeledEvalBatch};
use crate::model::{DualClassifier, FeatureExtractor};
use crate::utils::error::{BdaError, Result};
use crate::utils::metrics::{ratio, MetricsRecord};

/// Data an evaluation runs over
#[derive(Debug, Clone)]
pub struct EvalSets<B: Backend> {
    pub labeled: Vec<LabeledBatch<B>>,
    /// May be empty; the pseudo-label metrics then report 0
    pub unlabeled: Vec<UnlabeledEvalBatch<B>>,
}

impl<B: Backend> EvalSets<B> {
    pub fn new(labeled: Vec<LabeledBatch<B>>, unlabeled: Vec<UnlabeledEvalBatch<B>>) -> Self {
        Self { labeled, unlabeled }
    }
}

/// Runs evaluations and remembers the best pseudo-label accuracy of the run
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    highest_pseudo_acc: f64,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn highest_pseudo_acc(&self) -> f64 {
        self.highest_pseudo_acc
    }

    /// Fold a new pseudo-label accuracy into the running maximum
    pub fn observe_pseudo_acc(&mut self, acc: f64) -> f64 {
        if acc > self.highest_pseudo_acc {
            self.highest_pseudo_acc = acc;
        }
        self.highest_pseudo_acc
    }

    /// Evaluate `model` (expected to run without autodiff) on `sets`
    pub fn evaluate<B: Backend, E: FeatureExtractor<B>>(
        &mut self,
        model: &DualClassifier<B, E>,
        sets: &EvalSets<B>,
    ) -> Result<MetricsRecord> {
        if sets.labeled.is_empty() {
            return Err(BdaError::PreconditionViolation(
                "evaluation needs at least one labeled batch".to_string(),
            ));
        }

        let mut total_loss = 0.0;
        let mut total = 0usize;
        let mut correct = 0usize;
        let mut correct_fix = 0usize;

        for batch in &sets.labeled {
            let n = batch.targets.dims()[0];
            let (logits, features) = model.forward(batch.images.clone());
            let reverse = model.forward_reverse(features);

            let loss = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone(), batch.targets.clone());
            total_loss += loss.into_scalar().elem::<f64>() * n as f64;

            correct += count_equal(logits.argmax(1).reshape([n]), batch.targets.clone());
            correct_fix += count_equal(reverse.probs.argmin(1).reshape([n]), batch.targets.clone());
            total += n;
        }

        let mut ulb_total = 0usize;
        let mut pseudo_correct = 0usize;
        let mut complementary_hits = 0usize;

        for batch in &sets.unlabeled {
            let n = batch.targets.dims()[0];
            let (logits, features) = model.forward(batch.images.clone());
            let reverse = model.forward_reverse(features);

            pseudo_correct += count_equal(logits.argmax(1).reshape([n]), batch.targets.clone());
            complementary_hits +=
                count_equal(reverse.probs.argmax(1).reshape([n]), batch.targets.clone());
            ulb_total += n;
        }

        let pseudo_acc = ratio(pseudo_correct, ulb_total);
        // A complementary label is right when it is NOT the hidden class.
        let complementary_acc = if ulb_total > 0 {
            1.0 - ratio(complementary_hits, ulb_total)
        } else {
            0.0
        };
        let highest = self.observe_pseudo_acc(pseudo_acc);

        let mut record = MetricsRecord::new();
        record.insert("eval/loss", if total > 0 { total_loss / total as f64 } else { 0.0 });
        record.insert("eval/top-1-acc", ratio(correct, total));
        record.insert("eval/top-1-acc(argmin->A)", ratio(correct_fix, total));
        record.insert("ulb/pseudo_label_acc", pseudo_acc);
        record.insert("ulb/complementary_pseudo_label_acc", complementary_acc);
        record.insert("ulb/highest_pseudo_acc", highest);
        Ok(record)
    }
}

fn count_equal<B: Backend>(predictions: Tensor<B, 1, Int>, targets: Tensor<B, 1, Int>) -> usize {
    let hits: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    hits as usize
}
