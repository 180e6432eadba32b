//! Layer normalisation over the hidden axis.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Statistics (mean,
//! variance) are computed in [`PrecisionPolicy::reduction`] and the output is
//! cast back to the storage dtype. The learned bias is optional so that
//! bias-free transformer variants can share the implementation.

use candle_core::{DType, Device, Result, Tensor, D};

use crate::{checks, context::PrecisionPolicy};

/// Configuration for [`LayerNorm`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    pub hidden_size: usize,
    /// Numeric stabiliser added to the variance.
    pub epsilon: f64,
    /// Whether a learned additive bias follows the scale.
    pub has_bias: bool,
}

impl NormConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-6,
            has_bias: true,
        }
    }
}

/// Shared interface for normalisation layers used inside transformer layers.
pub trait NormalizationLayer: Send + Sync {
    /// Applies the normalisation to a hidden state tensor.
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

/// `gamma * (x - mean) / sqrt(var + eps) + beta`, with `beta` optional.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl LayerNorm {
    /// Constructs a LayerNorm from explicit parameters.
    pub fn new(config: NormConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        checks::expect_shape("norm.weight", &weight, &[config.hidden_size])?;
        checks::expect_dtype_in("norm.weight", &weight, checks::PARAMETER_DTYPES)?;
        match (&bias, config.has_bias) {
            (Some(bias), true) => {
                checks::expect_shape("norm.bias", bias, &[config.hidden_size])?;
                checks::expect_same_dtype("norm.bias", bias, "norm.weight", &weight)?;
            }
            (None, false) => {}
            (Some(_), false) => candle_core::bail!("norm.bias supplied but has_bias is false"),
            (None, true) => candle_core::bail!("norm.bias missing but has_bias is true"),
        }
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Unit scale and, when enabled, zero bias.
    pub fn initialised(config: NormConfig, dtype: DType, device: &Device) -> Result<Self> {
        let weight = Tensor::ones(config.hidden_size, dtype, device)?;
        let bias = if config.has_bias {
            Some(Tensor::zeros(config.hidden_size, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }
}

impl NormalizationLayer for LayerNorm {
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let compute = policy.cast_for_reduction(hidden)?;
        let mean = compute.mean_keepdim(D::Minus1)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        let mut normalized = centered
            .broadcast_div(&denom)?
            .to_dtype(policy.compute())?;

        normalized = normalized.broadcast_mul(&self.weight.to_dtype(normalized.dtype())?)?;
        if let Some(bias) = &self.bias {
            normalized = normalized.broadcast_add(&bias.to_dtype(normalized.dtype())?)?;
        }

        policy.cast_to_storage(&normalized)
    }
}
