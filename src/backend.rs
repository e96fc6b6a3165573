//! Compute backend selection
//!
//! The training model lives on `Autodiff<DefaultBackend>` and the momentum
//! evaluation model on its gradient-free inner backend. The concrete
//! backend is fixed at compile time by cargo feature; `cuda` takes
//! precedence over `ndarray`.

use burn::backend::Autodiff;
use burn::tensor::backend::{AutodiffBackend, Backend};

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("Enable the `ndarray` or the `cuda` feature to select a backend");

/// Backend of the model that receives gradients
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Backend of the momentum evaluation model and of evaluation data
pub type EvaluationBackend = <TrainingBackend as AutodiffBackend>::InnerBackend;

/// Device type shared by both backends
pub type Device = <DefaultBackend as Backend>::Device;

pub fn default_device() -> Device {
    Device::default()
}

/// Backend label printed in run logs
pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA (GPU)"
    } else {
        "NdArray (CPU)"
    }
}
