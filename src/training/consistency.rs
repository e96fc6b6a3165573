//! Unsupervised consistency objective
//!
//! Two terms tie the heads together on unlabeled data:
//!
//! - **agreement**: the reverse head on the strong view must put little mass
//!   where the weak-view primary pseudo label is confident, and vice versa.
//!   `-sum_c p_w[c] * ln(1 - r_s[c]) - sum_c r_w[c] * ln(1 - p_s[c])`
//! - **distribution**: weak-view pseudo labels are re-weighted by the inverse
//!   of the other head's running class distribution, renormalised, and used
//!   as soft targets for the strong view of the same head.
//!
//! Both are averaged over the batch. Pseudo labels and tracked
//! distributions never receive gradients.

use burn::tensor::{
    activation::{log_softmax, softmax},
    backend::Backend,
    Tensor,
};

const EPS: f64 = 1e-8;

/// The two unsupervised loss terms, before `lambda_u` weighting
#[derive(Debug, Clone)]
pub struct ConsistencyTerms<B: Backend> {
    pub agreement: Tensor<B, 1>,
    pub distribution: Tensor<B, 1>,
}

/// Compute both consistency terms for one unlabeled batch.
///
/// `dist_primary` and `dist_reverse` are tracker snapshots of shape
/// `[capacity, num_classes]`.
pub fn consistency_loss<B: Backend>(
    logits_w_reverse: Tensor<B, 2>,
    logits_s_reverse: Tensor<B, 2>,
    logits_w_primary: Tensor<B, 2>,
    logits_s_primary: Tensor<B, 2>,
    dist_primary: Tensor<B, 2>,
    dist_reverse: Tensor<B, 2>,
) -> ConsistencyTerms<B> {
    let pseudo_primary = softmax(logits_w_primary.detach(), 1);
    let pseudo_reverse = softmax(logits_w_reverse.detach(), 1);

    let agreement = agreement_term(
        pseudo_primary.clone(),
        pseudo_reverse.clone(),
        softmax(logits_s_primary.clone(), 1),
        softmax(logits_s_reverse.clone(), 1),
    );

    let mean_primary = dist_primary.mean_dim(0).detach();
    let mean_reverse = dist_reverse.mean_dim(0).detach();

    let target_primary = debias(pseudo_primary, mean_reverse);
    let target_reverse = debias(pseudo_reverse, mean_primary);

    let distribution = soft_cross_entropy(target_primary, logits_s_primary)
        .add(soft_cross_entropy(target_reverse, logits_s_reverse));

    ConsistencyTerms {
        agreement,
        distribution,
    }
}

fn agreement_term<B: Backend>(
    pseudo_primary: Tensor<B, 2>,
    pseudo_reverse: Tensor<B, 2>,
    probs_s_primary: Tensor<B, 2>,
    probs_s_reverse: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let reverse_miss = probs_s_reverse.neg().add_scalar(1.0 + EPS).log();
    let primary_miss = probs_s_primary.neg().add_scalar(1.0 + EPS).log();

    let per_sample = pseudo_primary
        .mul(reverse_miss)
        .sum_dim(1)
        .add(pseudo_reverse.mul(primary_miss).sum_dim(1))
        .neg();

    per_sample.mean()
}

/// Divide by a `[1, C]` class prior and renormalise each row
fn debias<B: Backend>(pseudo: Tensor<B, 2>, prior: Tensor<B, 2>) -> Tensor<B, 2> {
    let scaled = pseudo.div(prior.clamp_min(EPS));
    let norm = scaled.clone().sum_dim(1).clamp_min(EPS);
    scaled.div(norm)
}

fn soft_cross_entropy<B: Backend>(targets: Tensor<B, 2>, logits: Tensor<B, 2>) -> Tensor<B, 1> {
    targets
        .mul(log_softmax(logits, 1))
        .sum_dim(1)
        .neg()
        .mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::tensor::{Distribution, ElementConversion, TensorData};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn scalar<B: Backend>(t: Tensor<B, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    fn uniform<B: Backend>(rows: usize, classes: usize) -> Tensor<B, 2> {
        Tensor::ones([rows, classes], &Default::default()) / classes as f64
    }

    #[test]
    fn test_terms_are_finite_and_non_negative() {
        let device = Default::default();
        let logits = |seed_rows: usize| {
            Tensor::<TestBackend, 2>::random([seed_rows, 4], Distribution::Normal(0.0, 2.0), &device)
        };

        let terms = consistency_loss(
            logits(6),
            logits(6),
            logits(6),
            logits(6),
            uniform(8, 4),
            uniform(8, 4),
        );

        let agreement = scalar(terms.agreement);
        let distribution = scalar(terms.distribution);
        assert!(agreement.is_finite() && agreement >= 0.0);
        assert!(distribution.is_finite() && distribution >= 0.0);
    }

    #[test]
    fn test_agreement_hand_computed() {
        let device = Default::default();
        // Zero logits give uniform probabilities over two classes:
        // -2 * (0.5 ln 0.5 + 0.5 ln 0.5) = 2 ln 2 per sample.
        let zeros = Tensor::<TestBackend, 2>::zeros([3, 2], &device);

        let terms = consistency_loss(
            zeros.clone(),
            zeros.clone(),
            zeros.clone(),
            zeros,
            uniform(4, 2),
            uniform(4, 2),
        );

        let agreement = scalar(terms.agreement);
        assert!((agreement - 2.0 * std::f64::consts::LN_2).abs() < 1e-4);

        // Uniform priors leave uniform targets; CE of uniform vs uniform is ln 2 per head.
        let distribution = scalar(terms.distribution);
        assert!((distribution - 2.0 * std::f64::consts::LN_2).abs() < 1e-4);
    }

    #[test]
    fn test_debias_favours_rare_classes() {
        let device = Default::default();
        let pseudo = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.5f32, 0.5], [1, 2]),
            &device,
        );
        let prior = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.8f32, 0.2], [1, 2]),
            &device,
        );

        let target: Vec<f32> = debias(pseudo, prior).into_data().to_vec().unwrap();
        assert!((target[0] - 0.2).abs() < 1e-5);
        assert!((target[1] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_pseudo_labels_carry_no_gradient() {
        let device = Default::default();
        let weak_primary = Tensor::<TestAutodiffBackend, 2>::random(
            [4, 3],
            Distribution::Default,
            &device,
        )
        .require_grad();
        let strong_primary = Tensor::<TestAutodiffBackend, 2>::random(
            [4, 3],
            Distribution::Default,
            &device,
        )
        .require_grad();
        let weak_reverse =
            Tensor::<TestAutodiffBackend, 2>::random([4, 3], Distribution::Default, &device);
        let strong_reverse =
            Tensor::<TestAutodiffBackend, 2>::random([4, 3], Distribution::Default, &device);

        let terms = consistency_loss(
            weak_reverse,
            strong_reverse,
            weak_primary.clone(),
            strong_primary.clone(),
            uniform(5, 3),
            uniform(5, 3),
        );

        let grads = terms.agreement.add(terms.distribution).backward();
        assert!(weak_primary.grad(&grads).is_none());
        assert!(strong_primary.grad(&grads).is_some());
    }
}
