//! BDA training loop
//!
//! Each iteration runs one stacked forward pass over labeled, weak and
//! strong views, combines
//!
//! ```text
//! total = sup + reverse + lambda_u * (agreement + distribution)
//! ```
//!
//! and steps the optimizer, the scheduler and the momentum model. Every
//! `eval_interval` iterations the evaluation model is scored, the best
//! accuracy is tracked and a checkpoint is written by the primary process.

use std::path::Path;
use std::time::Instant;

use burn::{
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig,
    },
    record::Recorder,
    tensor::{activation::softmax, backend::AutodiffBackend, ElementConversion, Tensor},
};
use tracing::{info, warn};

use super::checkpoint::{
    prepare_dir, read_json, restore, write_json, CheckpointField, CheckpointRecorder,
    IterationRecord, LoadReport, BEST_CHECKPOINT, LATEST_CHECKPOINT,
};
use super::complementary::ComplementaryLabelSampler;
use super::consistency::consistency_loss;
use super::distribution::{DistributionTracker, Head};
use super::ema::MomentumEvaluationModel;
use super::evaluation::{EvalSets, Evaluator};
use super::scheduler::{IterationScheduler, LrSchedule};
use crate::dataset::{LabeledBatch, UnlabeledBatch};
use crate::model::{split_views, stack_views, BdaConfig, DualClassifier, FeatureExtractor};
use crate::utils::error::{BdaError, Result, ResultExt};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{MetricsRecord, MetricsSink};

/// Mutable bookkeeping of a run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingState {
    /// Index of the next iteration to run
    pub iteration: usize,
    /// Best `eval/top-1-acc` seen so far
    pub best_eval_acc: f64,
    /// Iteration at which `best_eval_acc` was observed
    pub best_iteration: usize,
    /// Current evaluation period
    pub eval_interval: usize,
}

impl TrainingState {
    pub fn new(eval_interval: usize) -> Self {
        Self {
            iteration: 0,
            best_eval_acc: 0.0,
            best_iteration: 0,
            eval_interval,
        }
    }
}

/// What a call to [`BdaTrainer::fit`] achieved
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub best_eval_acc: f64,
    pub best_iteration: usize,
    pub iterations_run: usize,
    pub evaluations: usize,
}

/// SGD with Nesterov momentum and weight decay, configured from `config`
pub fn sgd_optimizer<B: AutodiffBackend, E: AutodiffModule<B>>(
    config: &BdaConfig,
) -> impl Optimizer<DualClassifier<B, E>, B> + Clone
where
    E: burn::module::ModuleDisplay,
    E::InnerModule: burn::module::ModuleDisplay,
{
    let momentum = MomentumConfig::new()
        .with_momentum(config.sgd_momentum)
        .with_dampening(0.0)
        .with_nesterov(config.nesterov);

    SgdConfig::new()
        .with_momentum(Some(momentum))
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)))
        .init::<B, DualClassifier<B, E>>()
}

/// Trainer for a dual classifier on the feature extractor `E`
#[derive(Clone)]
pub struct BdaTrainer<B: AutodiffBackend, E: AutodiffModule<B>, O, S = IterationScheduler>
where
    E: burn::module::ModuleDisplay,
    E::InnerModule: burn::module::ModuleDisplay,
{
    model: DualClassifier<B, E>,
    ema: Option<MomentumEvaluationModel<B, E>>,
    optimizer: O,
    scheduler: S,
    tracker: DistributionTracker<B>,
    sampler: ComplementaryLabelSampler,
    evaluator: Evaluator,
    config: BdaConfig,
    state: TrainingState,
    logger: TrainingLogger,
    device: B::Device,
}

impl<B, E, O, S> BdaTrainer<B, E, O, S>
where
    B: AutodiffBackend,
    E: FeatureExtractor<B> + AutodiffModule<B> + burn::module::ModuleDisplay,
    E::InnerModule: FeatureExtractor<B::InnerBackend> + burn::module::ModuleDisplay,
    O: Optimizer<DualClassifier<B, E>, B> + Clone,
    S: LrSchedule,
{
    pub fn new(
        model: DualClassifier<B, E>,
        optimizer: O,
        scheduler: S,
        config: BdaConfig,
        device: B::Device,
    ) -> Result<Self> {
        config.validate()?;

        if model.num_classes() != config.num_classes {
            return Err(BdaError::InvalidConfig(format!(
                "model has {} classes but training is configured for {}",
                model.num_classes(),
                config.num_classes
            )));
        }

        let ema = if config.use_momentum_eval {
            Some(MomentumEvaluationModel::new(&model, config.ema_momentum)?)
        } else {
            None
        };

        if config.mixed_precision {
            info!("Mixed precision requested; precision follows the backend element type");
        }

        let tracker =
            DistributionTracker::new(config.distribution_window, config.num_classes, &device)?;
        let sampler = ComplementaryLabelSampler::new(config.num_classes, config.seed)?;

        Ok(Self {
            model,
            ema,
            optimizer,
            scheduler,
            tracker,
            sampler,
            evaluator: Evaluator::new(),
            state: TrainingState::new(config.num_eval_iter),
            logger: TrainingLogger::new(config.num_train_iter, config.log_interval),
            config,
            device,
        })
    }

    /// The network being trained
    pub fn underlying_model(&self) -> &DualClassifier<B, E> {
        &self.model
    }

    /// The momentum network, when evaluation uses one
    pub fn eval_model(&self) -> Option<&DualClassifier<B::InnerBackend, E::InnerModule>> {
        self.ema.as_ref().map(|ema| ema.underlying_model())
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn tracker(&self) -> &DistributionTracker<B> {
        &self.tracker
    }

    pub fn config(&self) -> &BdaConfig {
        &self.config
    }

    /// Train on zipped labeled and unlabeled sources.
    ///
    /// Stops once the iteration counter exceeds `num_train_iter` or when
    /// either source runs dry, whichever comes first.
    pub fn fit<L, U, M>(
        &mut self,
        labeled: L,
        unlabeled: U,
        eval_sets: &EvalSets<B::InnerBackend>,
        sink: &mut M,
    ) -> Result<TrainingSummary>
    where
        L: IntoIterator<Item = LabeledBatch<B>>,
        U: IntoIterator<Item = UnlabeledBatch<B>>,
        M: MetricsSink,
    {
        let start_iteration = self.state.iteration;
        let mut evaluations = 0;

        info!(
            "Starting BDA training at iteration {} of {} (USE_EMA: {})",
            start_iteration, self.config.num_train_iter, self.config.use_momentum_eval
        );

        let mut fetch_start = Instant::now();
        for (labeled_batch, unlabeled_batch) in labeled.into_iter().zip(unlabeled) {
            if self.state.iteration > self.config.num_train_iter {
                break;
            }
            let prefetch_time = fetch_start.elapsed().as_secs_f64();

            let run_start = Instant::now();
            let mut record = self.train_step(labeled_batch, unlabeled_batch)?;
            record.insert("train/prefetch_time", prefetch_time);
            record.insert("train/run_time", run_start.elapsed().as_secs_f64());

            let iteration = self.state.iteration;
            let evaluated = iteration % self.state.eval_interval == 0;
            if evaluated {
                let eval_record = self.evaluate(eval_sets)?;
                evaluations += 1;

                let acc = eval_record.get("eval/top-1-acc").unwrap_or(0.0);
                if acc > self.state.best_eval_acc {
                    self.state.best_eval_acc = acc;
                    self.state.best_iteration = iteration;
                }

                self.logger.log_evaluation(
                    iteration,
                    self.config.use_momentum_eval,
                    &eval_record,
                    self.state.best_eval_acc,
                    self.state.best_iteration,
                );
                record.extend(eval_record);

                if self.config.process.is_primary() {
                    let name = if iteration == self.state.best_iteration {
                        BEST_CHECKPOINT
                    } else {
                        LATEST_CHECKPOINT
                    };
                    self.save_model(name)?;
                }
            }

            if self.config.process.is_primary() {
                self.logger.log_iteration(iteration, &record);
                if evaluated || self.logger.should_log(iteration) {
                    sink.record(iteration, &record);
                }
            }

            self.state.iteration += 1;
            if self.state.iteration > self.config.eval_relax_after {
                self.state.eval_interval = self.config.relaxed_eval_interval;
            }

            fetch_start = Instant::now();
        }

        let iterations_run = self.state.iteration - start_iteration;
        self.logger.log_complete(
            iterations_run,
            self.state.best_eval_acc,
            self.state.best_iteration,
        );

        Ok(TrainingSummary {
            best_eval_acc: self.state.best_eval_acc,
            best_iteration: self.state.best_iteration,
            iterations_run,
            evaluations,
        })
    }

    /// One optimisation step; does not touch the iteration counter
    pub fn train_step(
        &mut self,
        labeled: LabeledBatch<B>,
        unlabeled: UnlabeledBatch<B>,
    ) -> Result<MetricsRecord> {
        let (stacked, num_lb, num_ulb) = stack_views(labeled.images, unlabeled.weak, unlabeled.strong)?;

        if num_lb == 0 || num_ulb == 0 {
            return Err(BdaError::PreconditionViolation(format!(
                "empty batch: {} labeled and {} unlabeled samples",
                num_lb, num_ulb
            )));
        }
        if labeled.targets.dims()[0] != num_lb {
            return Err(BdaError::PreconditionViolation(format!(
                "{} labels for {} labeled images",
                labeled.targets.dims()[0],
                num_lb
            )));
        }

        // Rejects labels outside 0..C before they reach a loss.
        let complementary = self.sampler.sample_tensor(&labeled.targets)?;

        let (logits, features) = self.model.forward(stacked);
        let logits = split_views(logits, num_lb, num_ulb);
        let features = split_views(features, num_lb, num_ulb);

        let reverse_lb = self.model.forward_reverse(features.labeled);
        let reverse_w = self.model.forward_reverse(features.weak);
        let reverse_s = self.model.forward_reverse(features.strong);

        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let sup_loss = loss_fn.forward(logits.labeled, labeled.targets.clone());

        let reverse_loss = loss_fn.forward(reverse_lb.logits, complementary);

        let num_classes = self.config.num_classes;
        let primary_mean = softmax(logits.weak.clone().detach(), 1)
            .mean_dim(0)
            .reshape([num_classes]);
        let reverse_mean = reverse_w.probs.detach().mean_dim(0).reshape([num_classes]);
        self.tracker.record(primary_mean, reverse_mean)?;

        let terms = consistency_loss(
            reverse_w.logits,
            reverse_s.logits,
            logits.weak,
            logits.strong,
            self.tracker.snapshot(Head::Primary),
            self.tracker.snapshot(Head::Reverse),
        );

        let total_loss = sup_loss.clone()
            + reverse_loss.clone()
            + (terms.agreement.clone() + terms.distribution.clone()) * self.config.lambda_u;

        let mut record = MetricsRecord::new();
        record.insert("train/sup_loss", scalar(&sup_loss));
        record.insert("train/reverse_loss", scalar(&reverse_loss));
        record.insert("train/unsup_loss_ca", scalar(&terms.agreement));
        record.insert("train/unsup_loss_cd", scalar(&terms.distribution));
        record.insert("train/total_loss", scalar(&total_loss));

        let grads = total_loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);

        let lr = self.scheduler.step();
        self.model = self.optimizer.step(lr, self.model.clone(), grads);
        record.insert("lr", lr);

        if let Some(ema) = self.ema.as_mut() {
            ema.update(&self.model);
        }

        Ok(record)
    }

    /// Score the evaluation model (momentum model or inference view of the
    /// training model) on `sets`
    pub fn evaluate(&mut self, sets: &EvalSets<B::InnerBackend>) -> Result<MetricsRecord> {
        match &self.ema {
            Some(ema) => self.evaluator.evaluate(ema.underlying_model(), sets),
            None => self.evaluator.evaluate(&self.model.valid(), sets),
        }
    }

    /// Write a checkpoint to `checkpoint_dir/save_name/name`
    pub fn save_model(&self, name: &str) -> Result<()> {
        let dir = prepare_dir(&self.config.save_path(), name)?;
        let recorder = CheckpointRecorder::new();

        self.model
            .clone()
            .save_file(dir.join("train_model"), &recorder)
            .context("Failed to save train_model")?;

        let eval_model = match &self.ema {
            Some(ema) => ema.underlying_model().clone(),
            None => self.model.valid(),
        };
        eval_model
            .save_file(dir.join("eval_model"), &recorder)
            .context("Failed to save eval_model")?;

        <CheckpointRecorder as Recorder<B>>::record(
            &recorder,
            self.optimizer.to_record(),
            dir.join("optimizer"),
        )
        .context("Failed to save optimizer")?;

        write_json(&dir.join("scheduler"), &self.scheduler.state()?)?;
        write_json(
            &dir.join("it"),
            &IterationRecord {
                it: self.state.iteration,
            },
        )?;

        info!("model saved: {:?}", dir);
        Ok(())
    }

    /// Restore whatever fields of the checkpoint in `dir` can be read.
    ///
    /// When the restored training and momentum models no longer share
    /// parameter ids (one of them was skipped), the momentum model is
    /// re-seeded from the training model so that it keeps tracking it.
    pub fn load_model(&mut self, dir: &Path) -> Result<LoadReport> {
        let fields = Self::checkpoint_fields(self.ema.is_some());
        let mut report = restore(self, dir, &fields)?;

        if let Some(ema) = self.ema.as_mut() {
            if !ema.is_aligned_with(&self.model) {
                warn!("Momentum model does not match the restored training model, re-seeding it");
                *ema = MomentumEvaluationModel::new(&self.model, self.config.ema_momentum)?;

                if let Some(pos) = report.restored.iter().position(|&f| f == "eval_model") {
                    report.restored.remove(pos);
                    report.skipped.push("eval_model");
                }
            }
        }

        self.state.eval_interval = if self.state.iteration > self.config.eval_relax_after {
            self.config.relaxed_eval_interval
        } else {
            self.config.num_eval_iter
        };

        info!("model loaded from {:?} at iteration {}", dir, self.state.iteration);
        Ok(report)
    }

    /// Fields read back by `load_model`. `eval_model` is only listed when
    /// evaluation uses a momentum model to restore it into.
    fn checkpoint_fields(with_momentum_model: bool) -> Vec<CheckpointField<Self>> {
        let mut fields = vec![
            CheckpointField {
                name: "train_model",
                required: true,
                load: |trainer: &mut Self, path| {
                    trainer.model = trainer.model.clone().load_file(
                        path.to_path_buf(),
                        &CheckpointRecorder::new(),
                        &trainer.device,
                    )?;
                    Ok(())
                },
            },
            CheckpointField {
                name: "eval_model",
                required: true,
                load: |trainer, path| {
                    let device = trainer.device.clone();
                    let ema = trainer.ema.as_mut().ok_or_else(|| {
                        BdaError::Checkpoint("no momentum model to restore into".to_string())
                    })?;
                    let model = ema.underlying_model().clone().load_file(
                        path.to_path_buf(),
                        &CheckpointRecorder::new(),
                        &device,
                    )?;
                    ema.set_model(model);
                    Ok(())
                },
            },
            CheckpointField {
                name: "optimizer",
                required: true,
                load: |trainer, path| {
                    let record = <CheckpointRecorder as Recorder<B>>::load(
                        &CheckpointRecorder::new(),
                        path.to_path_buf(),
                        &trainer.device,
                    )?;
                    trainer.optimizer = trainer.optimizer.clone().load_record(record);
                    Ok(())
                },
            },
            CheckpointField {
                name: "scheduler",
                required: false,
                load: |trainer, path| trainer.scheduler.load_state(read_json(path)?),
            },
            CheckpointField {
                name: "it",
                required: false,
                load: |trainer, path| {
                    trainer.state.iteration = read_json::<IterationRecord>(path)?.it;
                    Ok(())
                },
            },
        ];

        if !with_momentum_model {
            fields.retain(|field| field.name != "eval_model");
        }
        fields
    }
}

fn scalar<B: AutodiffBackend>(tensor: &Tensor<B, 1>) -> f64 {
    tensor.clone().into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::synthetic::{generate, SyntheticConfig};
    use crate::dataset::{
        cycle_batches, BatchStream, ImageShape, LabeledBatcher, UnlabeledBatcher,
        UnlabeledEvalBatcher,
    };
    use crate::model::backbone::FlattenExtractor;
    use crate::model::{ConvBackbone, ConvDualClassifier, ModelConfig, ProcessRole};
    use crate::training::ema::collect_params;
    use crate::training::scheduler::LRScheduler;
    use crate::utils::metrics::{MemorySink, NullSink};
    use burn::backend::Autodiff;
    use burn::data::dataloader::batcher::Batcher;
    use burn::data::dataset::Dataset;
    use burn::tensor::{Int, TensorData};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;
    type InnerBackend = NdArray;
    type TestModel = ConvDualClassifier<TestBackend>;

    const NUM_CLASSES: usize = 4;

    struct Fixture {
        labeled: Vec<LabeledBatch<TestBackend>>,
        unlabeled: Vec<UnlabeledBatch<TestBackend>>,
        eval: EvalSets<InnerBackend>,
    }

    fn fixture() -> Fixture {
        let config = SyntheticConfig {
            num_classes: NUM_CLASSES,
            shape: ImageShape::square(1, 8),
            labeled_per_class: 4,
            unlabeled_per_class: 8,
            eval_per_class: 4,
            ..Default::default()
        };
        let splits = generate(&config).unwrap();
        let device: <TestBackend as burn::tensor::backend::Backend>::Device = Default::default();

        let eval = EvalSets::new(
            vec![LabeledBatcher::new(config.shape).batch(splits.eval.iter().collect(), &device)],
            vec![UnlabeledEvalBatcher::new(config.shape)
                .batch(splits.unlabeled.iter().collect(), &device)],
        );

        let labeled: Vec<LabeledBatch<TestBackend>> = BatchStream::<TestBackend, _, _, _, _>::new(
            splits.labeled,
            LabeledBatcher::new(config.shape),
            4,
            0,
            device.clone(),
        )
        .collect();
        let unlabeled: Vec<UnlabeledBatch<TestBackend>> = BatchStream::<TestBackend, _, _, _, _>::new(
            splits.unlabeled,
            UnlabeledBatcher::new(config.shape),
            8,
            1,
            device.clone(),
        )
        .collect();

        Fixture {
            labeled,
            unlabeled,
            eval,
        }
    }

    fn config(dir: &TempDir, eval_every: usize) -> BdaConfig {
        BdaConfig {
            num_eval_iter: eval_every,
            distribution_window: 4,
            scheduler: LRScheduler::constant(0.01),
            checkpoint_dir: dir.path().to_string_lossy().to_string(),
            save_name: "test".to_string(),
            log_interval: 1,
            ..BdaConfig::debug(NUM_CLASSES)
        }
    }

    fn trainer(
        config: BdaConfig,
    ) -> BdaTrainer<
        TestBackend,
        ConvBackbone<TestBackend>,
        impl Optimizer<TestModel, TestBackend> + Clone,
    > {
        let device = Default::default();
        let model = TestModel::new(&ModelConfig::tiny(NUM_CLASSES), &device).unwrap();
        let optimizer = sgd_optimizer::<TestBackend, ConvBackbone<TestBackend>>(&config);
        let scheduler = IterationScheduler::new(config.scheduler.clone());
        BdaTrainer::new(model, optimizer, scheduler, config, device).unwrap()
    }

    fn assert_same_params<B: burn::tensor::backend::Backend, M: Module<B>>(a: &M, b: &M) {
        let a = collect_params(a);
        let b = collect_params(b);
        assert_eq!(a.len(), b.len());
        for (id, snapshot) in &a {
            let expected: Vec<f32> = snapshot.values.to_data().to_vec().unwrap();
            let actual: Vec<f32> = b[id].values.to_data().to_vec().unwrap();
            for (x, y) in expected.iter().zip(&actual) {
                assert!((x - y).abs() < 1e-6, "{} != {}", x, y);
            }
        }
    }

    #[test]
    fn test_reverse_loss_on_four_classes() {
        let device = Default::default();
        let model = TestModel::new(&ModelConfig::tiny(NUM_CLASSES), &device).unwrap();
        let mut sampler = ComplementaryLabelSampler::new(NUM_CLASSES, 2024).unwrap();

        let targets = Tensor::<TestBackend, 1, Int>::from_data(
            TensorData::new(vec![0i64, 1, 2, 3], [4]),
            &device,
        );
        let complementary = sampler.sample_tensor(&targets).unwrap();
        let drawn: Vec<i64> = complementary.to_data().iter::<i64>().collect();
        for (t, c) in [0i64, 1, 2, 3].iter().zip(&drawn) {
            assert_ne!(t, c);
        }

        let images = Tensor::<TestBackend, 4>::random(
            [4, 1, 8, 8],
            burn::tensor::Distribution::Default,
            &device,
        );
        let (_, features) = model.forward(images);
        let reverse = model.forward_reverse(features);
        let loss = CrossEntropyLossConfig::new()
            .init(&device)
            .forward(reverse.logits, complementary);

        let value = scalar(&loss);
        assert!(value.is_finite());
        assert!(value >= 0.0);
    }

    #[test]
    fn test_train_step_reports_losses() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let mut trainer = trainer(config(&dir, 10));

        let record = trainer
            .train_step(data.labeled[0].clone(), data.unlabeled[0].clone())
            .unwrap();

        for key in [
            "train/sup_loss",
            "train/reverse_loss",
            "train/unsup_loss_ca",
            "train/unsup_loss_cd",
            "train/total_loss",
            "lr",
        ] {
            let value = record.get(key).unwrap_or_else(|| panic!("missing {}", key));
            assert!(value.is_finite(), "{} = {}", key, value);
        }

        let parts = record.get("train/sup_loss").unwrap()
            + record.get("train/reverse_loss").unwrap()
            + record.get("train/unsup_loss_ca").unwrap()
            + record.get("train/unsup_loss_cd").unwrap();
        assert!((record.get("train/total_loss").unwrap() - parts).abs() < 1e-4);

        assert_eq!(trainer.tracker().cursor(), 1);
        assert_eq!(trainer.state().iteration, 0);
        assert_eq!(trainer.scheduler().steps, 1);
    }

    #[test]
    fn test_mismatched_views_are_fatal() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let mut trainer = trainer(config(&dir, 10));

        let mut unlabeled = data.unlabeled[0].clone();
        unlabeled.strong = unlabeled.strong.slice([0..3]);

        let err = trainer
            .train_step(data.labeled[0].clone(), unlabeled)
            .unwrap_err();
        assert!(matches!(err, BdaError::PreconditionViolation(_)));
    }

    #[test]
    fn test_one_evaluation_per_period() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let k = data.labeled.len();
        let mut trainer = trainer(config(&dir, k));
        let mut sink = MemorySink::new();

        let summary = trainer
            .fit(data.labeled, data.unlabeled, &data.eval, &mut sink)
            .unwrap();

        assert_eq!(summary.iterations_run, k);
        assert_eq!(summary.evaluations, 1);

        let evals: Vec<_> = sink.with_key("eval/top-1-acc").collect();
        assert_eq!(evals.len(), 1);
        let (iteration, record) = evals[0];
        assert_eq!(*iteration, 0);

        let acc = record.get("eval/top-1-acc").unwrap();
        let save_dir = dir.path().join("test");
        if acc > 0.0 {
            assert_eq!(summary.best_eval_acc, acc);
            assert_eq!(summary.best_iteration, 0);
            assert!(save_dir.join(BEST_CHECKPOINT).is_dir());
        } else {
            assert_eq!(summary.best_eval_acc, 0.0);
            assert!(save_dir.join(LATEST_CHECKPOINT).is_dir());
        }
    }

    #[test]
    fn test_stops_after_num_train_iter() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let mut trainer = trainer(BdaConfig {
            num_train_iter: 2,
            ..config(&dir, 100)
        });

        let summary = trainer
            .fit(
                cycle_batches(data.labeled),
                cycle_batches(data.unlabeled),
                &data.eval,
                &mut NullSink,
            )
            .unwrap();

        assert_eq!(summary.iterations_run, 3);
        assert_eq!(trainer.state().iteration, 3);
    }

    #[test]
    fn test_shorter_source_ends_the_pass() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let mut trainer = trainer(config(&dir, 100));

        let summary = trainer
            .fit(
                data.labeled.into_iter().take(1),
                cycle_batches(data.unlabeled),
                &data.eval,
                &mut NullSink,
            )
            .unwrap();

        assert_eq!(summary.iterations_run, 1);
    }

    #[test]
    fn test_eval_interval_relaxes() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let mut trainer = trainer(BdaConfig {
            eval_relax_after: 1,
            relaxed_eval_interval: 1000,
            ..config(&dir, 2)
        });

        let summary = trainer
            .fit(
                cycle_batches(data.labeled).take(4),
                cycle_batches(data.unlabeled),
                &data.eval,
                &mut NullSink,
            )
            .unwrap();

        assert_eq!(summary.evaluations, 1);
        assert_eq!(trainer.state().eval_interval, 1000);
    }

    #[test]
    fn test_evaluation_without_momentum_model() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let mut trainer = trainer(BdaConfig {
            use_momentum_eval: false,
            ..config(&dir, 10)
        });

        assert!(trainer.eval_model().is_none());
        let record = trainer.evaluate(&data.eval).unwrap();
        assert!(record.get("eval/top-1-acc").is_some());
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let config = config(&dir, 100);

        let mut original = trainer(config.clone());
        original
            .fit(
                cycle_batches(data.labeled.clone()).take(2),
                cycle_batches(data.unlabeled.clone()),
                &data.eval,
                &mut NullSink,
            )
            .unwrap();
        original.save_model(LATEST_CHECKPOINT).unwrap();

        let mut restored = trainer(config.clone());
        let report = restored
            .load_model(&config.save_path().join(LATEST_CHECKPOINT))
            .unwrap();

        assert!(report.is_complete(), "skipped {:?}", report.skipped);
        assert_eq!(restored.state().iteration, 2);
        assert_eq!(restored.scheduler(), original.scheduler());
        assert_same_params(original.underlying_model(), restored.underlying_model());
        assert_same_params(
            original.eval_model().unwrap(),
            restored.eval_model().unwrap(),
        );

        // Identical optimizer state: one more identical step keeps the models equal.
        restored.sampler = original.sampler.clone();
        restored.tracker = original.tracker.clone();
        original
            .train_step(data.labeled[0].clone(), data.unlabeled[0].clone())
            .unwrap();
        restored
            .train_step(data.labeled[0].clone(), data.unlabeled[0].clone())
            .unwrap();
        assert_same_params(original.underlying_model(), restored.underlying_model());
    }

    #[test]
    fn test_partial_checkpoint_restores_remaining_fields() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let config = config(&dir, 100);

        let mut original = trainer(config.clone());
        original
            .fit(
                cycle_batches(data.labeled).take(3),
                cycle_batches(data.unlabeled),
                &data.eval,
                &mut NullSink,
            )
            .unwrap();
        original.save_model(LATEST_CHECKPOINT).unwrap();

        let checkpoint = config.save_path().join(LATEST_CHECKPOINT);
        std::fs::remove_file(checkpoint.join("optimizer.mpk")).unwrap();
        std::fs::write(checkpoint.join("it.json"), "not json").unwrap();

        let mut restored = trainer(config);
        let report = restored.load_model(&checkpoint).unwrap();

        assert_eq!(report.skipped, vec!["optimizer", "it"]);
        assert_eq!(restored.state().iteration, 0);
        assert_same_params(original.underlying_model(), restored.underlying_model());
    }

    #[test]
    fn test_out_of_range_label_is_a_precondition_violation() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let mut trainer = trainer(config(&dir, 10));

        let mut labeled = data.labeled[0].clone();
        let n = labeled.targets.dims()[0];
        let mut targets: Vec<i64> = (0..n as i64).map(|i| i % NUM_CLASSES as i64).collect();
        targets[n - 1] = NUM_CLASSES as i64 + 3;
        labeled.targets = Tensor::<TestBackend, 1, Int>::from_data(
            TensorData::new(targets, [n]),
            &Default::default(),
        );

        let err = trainer
            .train_step(labeled, data.unlabeled[0].clone())
            .unwrap_err();

        assert!(matches!(err, BdaError::PreconditionViolation(_)));
        assert_eq!(trainer.tracker().cursor(), 0);
        assert_eq!(trainer.scheduler().steps, 0);
    }

    #[test]
    fn test_momentum_model_tracks_after_eval_model_is_skipped() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let config = config(&dir, 100);

        let mut original = trainer(config.clone());
        original
            .fit(
                cycle_batches(data.labeled.clone()).take(2),
                cycle_batches(data.unlabeled.clone()),
                &data.eval,
                &mut NullSink,
            )
            .unwrap();
        original.save_model(LATEST_CHECKPOINT).unwrap();

        let checkpoint = config.save_path().join(LATEST_CHECKPOINT);
        std::fs::remove_file(checkpoint.join("eval_model.mpk")).unwrap();

        let mut restored = trainer(config);
        let report = restored.load_model(&checkpoint).unwrap();
        assert_eq!(report.skipped, vec!["eval_model"]);

        // Re-seeded as a verbatim copy of the restored training model.
        let seed = restored.eval_model().unwrap().clone();
        assert_same_params(&restored.underlying_model().valid(), &seed);

        restored
            .train_step(data.labeled[0].clone(), data.unlabeled[0].clone())
            .unwrap();

        let before = collect_params(&seed);
        let after = collect_params(restored.eval_model().unwrap());
        let moved = before.iter().any(|(id, snapshot)| {
            let old: Vec<f32> = snapshot.values.to_data().to_vec().unwrap();
            let new: Vec<f32> = after[id].values.to_data().to_vec().unwrap();
            old.iter().zip(&new).any(|(o, n)| (o - n).abs() > 0.0)
        });
        assert!(moved, "momentum model did not move after a training step");
    }

    #[test]
    fn test_eval_model_not_listed_without_momentum_model() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let config = BdaConfig {
            use_momentum_eval: false,
            ..config(&dir, 100)
        };

        let mut original = trainer(config.clone());
        original
            .fit(
                cycle_batches(data.labeled).take(1),
                cycle_batches(data.unlabeled),
                &data.eval,
                &mut NullSink,
            )
            .unwrap();
        original.save_model(LATEST_CHECKPOINT).unwrap();

        let mut restored = trainer(config.clone());
        let report = restored
            .load_model(&config.save_path().join(LATEST_CHECKPOINT))
            .unwrap();

        assert!(report.is_complete(), "skipped {:?}", report.skipped);
        assert!(!report.restored.contains(&"eval_model"));
        assert_eq!(report.restored, vec!["train_model", "optimizer", "scheduler", "it"]);
    }

    #[test]
    fn test_secondary_process_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let mut trainer = trainer(BdaConfig {
            process: ProcessRole::new(1, 2),
            ..config(&dir, 100)
        });
        let mut sink = MemorySink::new();

        // One iteration: the evaluation at iteration 0 sees the final model.
        let summary = trainer
            .fit(
                data.labeled.into_iter().take(1),
                data.unlabeled,
                &data.eval,
                &mut sink,
            )
            .unwrap();

        assert_eq!(summary.evaluations, 1);
        assert!(sink.records.is_empty());

        let save_dir = dir.path().join("test");
        assert!(!save_dir.join(BEST_CHECKPOINT).exists());
        assert!(!save_dir.join(LATEST_CHECKPOINT).exists());

        let acc = trainer
            .evaluate(&data.eval)
            .unwrap()
            .get("eval/top-1-acc")
            .unwrap();
        assert_eq!(summary.best_eval_acc, acc);
        assert_eq!(trainer.state().best_eval_acc, acc);
        assert_eq!(summary.best_iteration, 0);
    }

    #[test]
    fn test_trains_on_another_extractor() {
        let dir = TempDir::new().unwrap();
        let data = fixture();
        let config = config(&dir, 100);
        let device = Default::default();

        let extractor = FlattenExtractor::<TestBackend>::new(8 * 8, 6, &device);
        let model = DualClassifier::with_extractor(extractor, NUM_CLASSES, 0.0, &device).unwrap();
        let optimizer = sgd_optimizer::<TestBackend, FlattenExtractor<TestBackend>>(&config);
        let scheduler = IterationScheduler::new(config.scheduler.clone());
        let mut trainer = BdaTrainer::new(model, optimizer, scheduler, config, device).unwrap();

        let summary = trainer
            .fit(
                cycle_batches(data.labeled).take(2),
                cycle_batches(data.unlabeled),
                &data.eval,
                &mut NullSink,
            )
            .unwrap();

        assert_eq!(summary.iterations_run, 2);
        assert_eq!(summary.evaluations, 1);
        assert!(trainer.eval_model().is_some());
    }
}
