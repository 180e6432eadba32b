//! Per-call execution context: training mode plus precision policy.
//!
//! Dropout behaviour depends on whether a forward pass runs in training or
//! evaluation mode. Rather than flipping a flag stored inside every module,
//! callers pass a [`ForwardContext`] into each forward call and the context is
//! threaded down to the sub-layers that care about it.
//!
//! Parameters typically live in `f16`/`bf16` while matmuls and activations are
//! evaluated in `f32`; reductions (normalisation statistics) are always at
//! least `f32`. [`PrecisionPolicy`] records those choices so every component
//! casts the same way.

use candle_core::{DType, Result, Tensor};

/// Whether stochastic layers (dropout) are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Dropout masks are sampled.
    Train,
    /// Every stochastic layer is the identity.
    #[default]
    Eval,
}

/// Describes how tensors are cast during different phases of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Constructs a policy from explicit dtype selections.
    pub fn new(storage: DType, compute: DType, reduction: DType) -> Self {
        Self {
            storage,
            compute,
            reduction,
        }
    }

    /// Builds a policy from the parameter storage dtype.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        let reduction = match storage {
            DType::F64 => DType::F64,
            _ => DType::F32,
        };
        Self::new(storage, compute, reduction)
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn reduction(&self) -> DType {
        self.reduction
    }

    /// Casts a tensor to the compute dtype for matmul readiness.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor to the reduction dtype for statistics.
    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.reduction)
    }

    /// Casts a tensor back to the storage dtype (or leaves it unchanged).
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

/// Mode and precision shared by every sub-layer of one forward call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardContext {
    pub mode: Mode,
    pub policy: PrecisionPolicy,
}

impl ForwardContext {
    pub fn new(mode: Mode, policy: PrecisionPolicy) -> Self {
        Self { mode, policy }
    }

    /// Evaluation context for parameters stored as `dtype`.
    pub fn eval(dtype: DType) -> Self {
        Self::new(Mode::Eval, PrecisionPolicy::from_parameter_dtype(dtype))
    }

    /// Training context for parameters stored as `dtype`.
    pub fn train(dtype: DType) -> Self {
        Self::new(Mode::Train, PrecisionPolicy::from_parameter_dtype(dtype))
    }

    pub fn is_training(&self) -> bool {
        self.mode == Mode::Train
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}
