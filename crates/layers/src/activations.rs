//! Activation catalogue for transformer feed-forward stacks.
//!
//! Activations consume tensors of any layout and return tensors with the same
//! layout. Inputs are promoted to [`PrecisionPolicy::compute`] before the
//! non-linearity is evaluated and cast back to the storage dtype afterwards.
//!
//! # Built-in formulas
//!
//! * **gelu** uses the exact erf form `0.5 * x * (1 + erf(x / sqrt(2)))`.
//! * **gelu_fast** uses the tanh approximation
//!   `0.5 * x * (1 + tanh(sqrt(2 / pi) * (x + 0.044715 * x^3)))`.
//! * **silu** computes `x * sigmoid(x)`.
//! * **relu** zeroes negative values.
//! * **linear** is the identity.

use std::{fmt, str::FromStr, sync::Arc};

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

use crate::{context::PrecisionPolicy, LayerError};

/// Identifies which non-linearity is implemented by an [`Activation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActivationKind {
    Gelu,
    GeluFast,
    Relu,
    Silu,
    Linear,
}

impl ActivationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationKind::Gelu => "gelu",
            ActivationKind::GeluFast => "gelu_fast",
            ActivationKind::Relu => "relu",
            ActivationKind::Silu => "silu",
            ActivationKind::Linear => "linear",
        }
    }
}

impl FromStr for ActivationKind {
    type Err = LayerError;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name {
            "gelu" => Ok(ActivationKind::Gelu),
            "gelu_fast" => Ok(ActivationKind::GeluFast),
            "relu" => Ok(ActivationKind::Relu),
            "silu" => Ok(ActivationKind::Silu),
            "linear" => Ok(ActivationKind::Linear),
            other => Err(LayerError::UnknownActivation(other.to_string())),
        }
    }
}

impl TryFrom<String> for ActivationKind {
    type Error = LayerError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActivationKind> for String {
    fn from(kind: ActivationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common interface shared by activation functions.
pub trait Activation: Send + Sync {
    /// Applies the activation to `input` using the precision rules in `policy`.
    fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

/// Built-in activation backed by Candle kernels.
struct BuiltinActivation {
    kind: ActivationKind,
}

impl Activation for BuiltinActivation {
    fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        if self.kind == ActivationKind::Linear {
            return policy.cast_to_storage(input);
        }
        let compute = policy.cast_for_matmul(input)?;
        let activated = match self.kind {
            ActivationKind::Gelu => compute.gelu_erf()?,
            ActivationKind::GeluFast => compute.gelu()?,
            ActivationKind::Relu => compute.relu()?,
            ActivationKind::Silu => compute.silu()?,
            ActivationKind::Linear => compute,
        };
        policy.cast_to_storage(&activated)
    }
}

/// Returns a shared built-in activation implementation.
pub fn builtin(kind: ActivationKind) -> Arc<dyn Activation> {
    Arc::new(BuiltinActivation { kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::f64::consts::SQRT_2;

    fn policy() -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(DType::F32)
    }

    #[test]
    fn gelu_matches_reference_formula() -> Result<()> {
        let device = Device::Cpu;
        let activation = builtin(ActivationKind::Gelu);
        let input = Tensor::from_slice(&[-2.5f32, -0.5, 0.0, 1.0, 3.0], (5,), &device)?;
        let output = activation.forward(&input, &policy())?;

        let reference = {
            let term = input.affine(1.0 / SQRT_2, 0.0)?.erf()?;
            let inner = (term + 1.0)?;
            input.affine(0.5, 0.0)?.mul(&inner)?
        };

        let diff = output.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 5e-6);
        Ok(())
    }

    #[test]
    fn gelu_fast_stays_close_to_exact_gelu() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-3.0f32, -1.0, 0.0, 0.5, 2.0], (5,), &device)?;
        let exact = builtin(ActivationKind::Gelu).forward(&input, &policy())?;
        let fast = builtin(ActivationKind::GeluFast).forward(&input, &policy())?;
        let diff = exact.sub(&fast)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-2, "tanh approximation drifted by {diff}");
        Ok(())
    }

    #[test]
    fn silu_matches_swish_reference() -> Result<()> {
        let device = Device::Cpu;
        let activation = builtin(ActivationKind::Silu);
        let input = Tensor::from_slice(&[-3.0f32, -1.0, 0.0, 0.5, 2.0], (5,), &device)?;
        let output = activation.forward(&input, &policy())?;

        let sigmoid = (input.neg()?.exp()? + 1.0)?.recip()?;
        let reference = input.mul(&sigmoid)?;
        let diff = output.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 5e-6);
        Ok(())
    }

    #[test]
    fn relu_and_linear_behave() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-1.0f32, 0.0, 2.0], (3,), &device)?;
        let relu = builtin(ActivationKind::Relu).forward(&input, &policy())?;
        assert_eq!(relu.to_vec1::<f32>()?, vec![0.0, 0.0, 2.0]);
        let linear = builtin(ActivationKind::Linear).forward(&input, &policy())?;
        assert_eq!(linear.to_vec1::<f32>()?, vec![-1.0, 0.0, 2.0]);
        Ok(())
    }

    #[test]
    fn names_parse_and_reject_unknown() {
        assert_eq!("gelu_fast".parse::<ActivationKind>(), Ok(ActivationKind::GeluFast));
        assert_eq!(ActivationKind::Silu.to_string(), "silu");
        assert_eq!(
            "swish".parse::<ActivationKind>(),
            Err(LayerError::UnknownActivation("swish".into()))
        );
    }
}
