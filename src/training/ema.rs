//! Momentum (exponential moving average) evaluation model
//!
//! The evaluation copy lives on the inner, gradient-free backend, so it can
//! never take part in backpropagation. Parameters are matched to the
//! training model by `ParamId`, which `AutodiffModule::valid` preserves.
//! Loading a record replaces the ids, so a model restored on its own no
//! longer lines up with its partner; see [`MomentumEvaluationModel::is_aligned_with`].

use std::collections::{HashMap, HashSet};

use burn::{
    module::{AutodiffModule, Module, ModuleMapper, ModuleVisitor, Param, ParamId},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};
use tracing::warn;

use crate::model::DualClassifier;
use crate::utils::error::{BdaError, Result};

/// Flattened copy of one float tensor of a module
#[derive(Debug, Clone)]
pub struct ParamSnapshot<B: Backend> {
    pub values: Tensor<B, 1>,
    /// Running statistics and other state that is not trained by gradients
    pub is_buffer: bool,
}

/// Every float tensor of `module`, keyed by `ParamId`
pub fn collect_params<B: Backend, M: Module<B>>(module: &M) -> HashMap<ParamId, ParamSnapshot<B>> {
    struct Collector<B: Backend> {
        params: HashMap<ParamId, ParamSnapshot<B>>,
    }

    impl<B: Backend> ModuleVisitor<B> for Collector<B> {
        fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
            let tensor = param.val();
            let is_buffer = !tensor.is_require_grad();
            let numel = tensor.shape().num_elements();

            self.params.insert(
                param.id,
                ParamSnapshot {
                    values: tensor.reshape([numel]),
                    is_buffer,
                },
            );
        }
    }

    let mut collector = Collector {
        params: HashMap::new(),
    };
    module.visit(&mut collector);
    collector.params
}

/// `ParamId` of every float tensor of `module`
pub fn param_ids<B: Backend, M: Module<B>>(module: &M) -> HashSet<ParamId> {
    struct Ids(HashSet<ParamId>);

    impl<B: Backend> ModuleVisitor<B> for Ids {
        fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
            self.0.insert(param.id);
        }
    }

    let mut ids = Ids(HashSet::new());
    module.visit(&mut ids);
    ids.0
}

struct MomentumMapper<B: Backend> {
    train: HashMap<ParamId, ParamSnapshot<B>>,
    momentum: f64,
    missing: usize,
}

impl<B: Backend> ModuleMapper<B> for MomentumMapper<B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let (id, tensor, mapper) = param.consume();

        let Some(source) = self.train.remove(&id) else {
            self.missing += 1;
            return Param::from_mapped_value(id, tensor, mapper);
        };

        let train = source.values.reshape(tensor.shape());
        let updated = if source.is_buffer {
            train
        } else {
            tensor
                .mul_scalar(self.momentum)
                .add(train.mul_scalar(1.0 - self.momentum))
        };

        Param::from_mapped_value(id, updated, mapper)
    }
}

/// Gradient-free running average of the training model
#[derive(Debug, Clone)]
pub struct MomentumEvaluationModel<B: AutodiffBackend, E: AutodiffModule<B>>
where
    E: burn::module::ModuleDisplay,
    E::InnerModule: burn::module::ModuleDisplay,
{
    model: DualClassifier<B::InnerBackend, E::InnerModule>,
    momentum: f64,
}

impl<B: AutodiffBackend, E: AutodiffModule<B>> MomentumEvaluationModel<B, E>
where
    E: burn::module::ModuleDisplay,
    E::InnerModule: burn::module::ModuleDisplay,
{
    /// Start from an exact copy of the training model.
    ///
    /// `momentum` must lie in `[0, 1)`.
    pub fn new(train_model: &DualClassifier<B, E>, momentum: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&momentum) {
            return Err(BdaError::InvalidConfig(format!(
                "EMA momentum must be in [0, 1), got {}",
                momentum
            )));
        }

        Ok(Self {
            model: train_model.valid(),
            momentum,
        })
    }

    /// Whether every tensor of `train_model` has a counterpart here.
    ///
    /// `update` only blends matched tensors, so a misaligned pair would
    /// leave the evaluation model frozen.
    pub fn is_aligned_with(&self, train_model: &DualClassifier<B, E>) -> bool {
        param_ids(train_model) == param_ids(&self.model)
    }

    /// `eval = eval * m + train * (1 - m)` for trainable parameters;
    /// buffers are copied from the training model as they are.
    pub fn update(&mut self, train_model: &DualClassifier<B, E>) {
        let train = collect_params(train_model)
            .into_iter()
            .map(|(id, snapshot)| {
                (
                    id,
                    ParamSnapshot {
                        values: snapshot.values.inner(),
                        is_buffer: snapshot.is_buffer,
                    },
                )
            })
            .collect();

        let mut mapper = MomentumMapper {
            train,
            momentum: self.momentum,
            missing: 0,
        };
        self.model = self.model.clone().map(&mut mapper);

        if mapper.missing > 0 || !mapper.train.is_empty() {
            warn!(
                "EMA update skipped {} evaluation tensors and {} training tensors without a counterpart",
                mapper.missing,
                mapper.train.len()
            );
        }
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    /// The averaged network itself, for inference or serialization
    pub fn underlying_model(&self) -> &DualClassifier<B::InnerBackend, E::InnerModule> {
        &self.model
    }

    /// Swap in a restored network
    pub fn set_model(&mut self, model: DualClassifier<B::InnerBackend, E::InnerModule>) {
        self.model = model;
    }
}
