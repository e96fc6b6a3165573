//! Synthetic in-memory image data
//!
//! Each class gets a random prototype image; samples are noisy copies of
//! their class prototype. Unlabeled samples come with a lightly perturbed
//! weak view and a heavily perturbed strong view (noise plus pixel
//! dropout). Enough to drive the full training loop without an external
//! data pipeline.

use burn::data::dataset::InMemDataset;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::batch::{ImageItem, ImageShape, UnlabeledItem};
use crate::utils::error::{BdaError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub num_classes: usize,
    pub shape: ImageShape,
    pub labeled_per_class: usize,
    pub unlabeled_per_class: usize,
    pub eval_per_class: usize,
    /// Standard deviation of the per-sample noise around a prototype
    pub sample_noise: f32,
    pub weak_noise: f32,
    pub strong_noise: f32,
    /// Probability of zeroing a pixel in the strong view
    pub strong_dropout: f32,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_classes: 4,
            shape: ImageShape::square(1, 8),
            labeled_per_class: 8,
            unlabeled_per_class: 64,
            eval_per_class: 16,
            sample_noise: 0.3,
            weak_noise: 0.05,
            strong_noise: 0.3,
            strong_dropout: 0.2,
            seed: 0,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_classes < 2 {
            return Err(BdaError::InvalidConfig(
                "synthetic data needs at least 2 classes".to_string(),
            ));
        }
        if self.shape.num_elements() == 0 {
            return Err(BdaError::InvalidConfig(
                "synthetic images must have at least one pixel".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.strong_dropout) {
            return Err(BdaError::InvalidConfig(
                "strong_dropout must be in range [0.0, 1.0)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Labeled, unlabeled and evaluation splits drawn from the same prototypes
pub struct SyntheticSplits {
    pub labeled: InMemDataset<ImageItem>,
    pub unlabeled: InMemDataset<UnlabeledItem>,
    pub eval: InMemDataset<ImageItem>,
}

struct Generator {
    rng: ChaCha8Rng,
    prototypes: Vec<Vec<f32>>,
}

impl Generator {
    fn new(config: &SyntheticConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let prototypes = (0..config.num_classes)
            .map(|_| {
                (0..config.shape.num_elements())
                    .map(|_| rng.gen_range(-1.0f32..1.0))
                    .collect()
            })
            .collect();

        Self { rng, prototypes }
    }

    fn gaussian(&mut self) -> f32 {
        // Box-Muller
        let u1: f32 = self.rng.gen_range(f32::EPSILON..1.0);
        let u2: f32 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
    }

    fn perturb(&mut self, image: &[f32], std: f32, dropout: f32) -> Vec<f32> {
        image
            .iter()
            .map(|&v| {
                if dropout > 0.0 && self.rng.gen::<f32>() < dropout {
                    0.0
                } else {
                    v + std * self.gaussian()
                }
            })
            .collect()
    }

    fn sample(&mut self, label: usize, std: f32) -> Vec<f32> {
        let prototype = self.prototypes[label].clone();
        self.perturb(&prototype, std, 0.0)
    }
}

/// Generate all three splits deterministically from `config.seed`
pub fn generate(config: &SyntheticConfig) -> Result<SyntheticSplits> {
    config.validate()?;
    let mut generator = Generator::new(config);

    let mut labeled = Vec::with_capacity(config.num_classes * config.labeled_per_class);
    let mut unlabeled = Vec::with_capacity(config.num_classes * config.unlabeled_per_class);
    let mut eval = Vec::with_capacity(config.num_classes * config.eval_per_class);

    for label in 0..config.num_classes {
        for _ in 0..config.labeled_per_class {
            labeled.push(ImageItem {
                image: generator.sample(label, config.sample_noise),
                label,
            });
        }

        for _ in 0..config.unlabeled_per_class {
            let base = generator.sample(label, config.sample_noise);
            unlabeled.push(UnlabeledItem {
                weak: generator.perturb(&base, config.weak_noise, 0.0),
                strong: generator.perturb(&base, config.strong_noise, config.strong_dropout),
                label,
            });
        }

        for _ in 0..config.eval_per_class {
            eval.push(ImageItem {
                image: generator.sample(label, config.sample_noise),
                label,
            });
        }
    }

    Ok(SyntheticSplits {
        labeled: InMemDataset::new(labeled),
        unlabeled: InMemDataset::new(unlabeled),
        eval: InMemDataset::new(eval),
    })
}
