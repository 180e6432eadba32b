//! Scaled dot-product attention over `heads_num` learned projections.
//!
//! ```text
//! scores = q k^T (+ position_bias)
//! scores = scores / sqrt(head_size) + mask
//! out    = final_linear(dropout(softmax(scores)) v)
//! ```
//!
//! The position bias joins the raw scores before scaling, so a learned bias
//! table is trained at the same scale as the dot products.

use std::sync::OnceLock;

use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::ops::{dropout, softmax};
use layers::{
    checks,
    linear::{Linear, LinearConfig, LinearInit},
    ForwardContext,
};

use crate::core::{Attention, AttentionConfig, AttentionError};

/// Reference multi-head attention with query, key, value and output projections.
#[derive(Debug)]
pub struct MultiHeadedAttention {
    config: AttentionConfig,
    linear_query: Linear,
    linear_key: Linear,
    linear_value: Linear,
    final_linear: Linear,
    first_call: OnceLock<()>,
}

impl MultiHeadedAttention {
    /// Builds the block with freshly initialised projections.
    pub fn new(config: AttentionConfig, init: &LinearInit, device: &Device, dtype: DType) -> Result<Self> {
        validate(&config)?;
        let linear_query = Linear::with_init(in_projection(&config), init, device, dtype)?;
        let linear_key = Linear::with_init(in_projection(&config), init, device, dtype)?;
        let linear_value = Linear::with_init(in_projection(&config), init, device, dtype)?;
        let final_linear = Linear::with_init(out_projection(&config), init, device, dtype)?;
        Self::from_linears(config, linear_query, linear_key, linear_value, final_linear)
    }

    /// Assembles the block from existing projections, e.g. loaded weights.
    pub fn from_linears(
        config: AttentionConfig,
        linear_query: Linear,
        linear_key: Linear,
        linear_value: Linear,
        final_linear: Linear,
    ) -> Result<Self> {
        validate(&config)?;
        let inward = in_projection(&config);
        for (label, linear) in [
            ("attention.linear_query", &linear_query),
            ("attention.linear_key", &linear_key),
            ("attention.linear_value", &linear_value),
        ] {
            expect_projection(label, linear, &inward)?;
        }
        expect_projection("attention.final_linear", &final_linear, &out_projection(&config))?;
        Ok(Self {
            config,
            linear_query,
            linear_key,
            linear_value,
            final_linear,
            first_call: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    /// `(batch, len, heads * head_size)` -> `(batch, heads, len, head_size)`.
    fn split_heads(&self, tensor: &Tensor, batch: usize, len: usize) -> Result<Tensor> {
        tensor
            .reshape((batch, len, self.config.heads_num, self.config.head_size))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn check_inputs(
        &self,
        key: &Tensor,
        value: &Tensor,
        query: &Tensor,
        mask: &Tensor,
        position_bias: Option<&Tensor>,
    ) -> std::result::Result<(usize, usize, usize), AttentionError> {
        let hidden = self.config.hidden_size;
        let dims3 = |label: &str, tensor: &Tensor| {
            tensor
                .dims3()
                .ok()
                .filter(|(_, _, h)| *h == hidden)
                .ok_or_else(|| AttentionError::InvalidShape {
                    context: format!("{label}: expected (batch, seq, {hidden}) got {:?}", tensor.dims()),
                })
        };
        let (batch, q_len, _) = dims3("query", query)?;
        let (kb, k_len, _) = dims3("key", key)?;
        let (vb, v_len, _) = dims3("value", value)?;
        if kb != batch || vb != batch || v_len != k_len {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "key/value: expected ({batch}, k_len, {hidden}) with equal lengths, got {:?} and {:?}",
                    key.dims(),
                    value.dims()
                ),
            });
        }

        let heads = self.config.heads_num;
        if !broadcastable(mask.dims(), [batch, heads, q_len, k_len]) {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "mask: expected broadcastable to ({batch}, 1, {q_len}, {k_len}) got {:?}",
                    mask.dims()
                ),
            });
        }
        if let Some(bias) = position_bias {
            let ok = bias.dims().len() == 4
                && broadcastable(bias.dims(), [batch, heads, q_len, k_len])
                && bias.dims()[1] == heads;
            if !ok {
                return Err(AttentionError::InvalidShape {
                    context: format!(
                        "position_bias: expected (1, {heads}, {q_len}, {k_len}) got {:?}",
                        bias.dims()
                    ),
                });
            }
        }
        Ok((batch, q_len, k_len))
    }
}

impl Attention for MultiHeadedAttention {
    fn attend(
        &self,
        key: &Tensor,
        value: &Tensor,
        query: &Tensor,
        mask: &Tensor,
        position_bias: Option<&Tensor>,
        ctx: &ForwardContext,
    ) -> Result<Tensor> {
        let policy = &ctx.policy;
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init heads={} head_size={} bias={} dropout={} storage={:?} compute={:?}",
                self.config.heads_num,
                self.config.head_size,
                self.config.has_bias,
                self.config.dropout_p,
                policy.storage(),
                policy.compute()
            );
        }

        let (batch, q_len, k_len) = self.check_inputs(key, value, query, mask, position_bias)?;

        let q = self.split_heads(&self.linear_query.forward(query, policy)?, batch, q_len)?;
        let k = self.split_heads(&self.linear_key.forward(key, policy)?, batch, k_len)?;
        let v = self.split_heads(&self.linear_value.forward(value, policy)?, batch, k_len)?;
        let q = policy.cast_for_matmul(&q)?;
        let k = policy.cast_for_matmul(&k)?;
        let v = policy.cast_for_matmul(&v)?;

        let mut scores = q.matmul(&k.transpose(2, 3)?.contiguous()?)?;
        if let Some(bias) = position_bias {
            scores = scores.broadcast_add(&bias.to_dtype(scores.dtype())?)?;
        }
        scores = (scores / (self.config.head_size as f64).sqrt())?;
        scores = scores.broadcast_add(&mask.to_dtype(scores.dtype())?)?;

        let mut probs = softmax(&scores, D::Minus1)?;
        if ctx.is_training() && self.config.dropout_p > 0.0 {
            probs = dropout(&probs, self.config.dropout_p)?;
        }

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, q_len, self.config.inner_size()))?;
        let context = policy.cast_to_storage(&context)?;
        log::trace!(
            "attention q_len={} k_len={} bias={}",
            q_len,
            k_len,
            position_bias.is_some()
        );
        self.final_linear.forward(&context, policy)
    }
}

fn validate(config: &AttentionConfig) -> std::result::Result<(), AttentionError> {
    if config.hidden_size == 0 || config.heads_num == 0 || config.head_size == 0 {
        return Err(AttentionError::InvalidConfig(format!(
            "hidden_size, heads_num and head_size must be positive, got {config:?}"
        )));
    }
    if !(0.0..1.0).contains(&config.dropout_p) {
        return Err(AttentionError::InvalidConfig(format!(
            "dropout_p must lie in [0, 1), got {}",
            config.dropout_p
        )));
    }
    Ok(())
}

fn in_projection(config: &AttentionConfig) -> LinearConfig {
    LinearConfig::new(config.hidden_size, config.inner_size()).with_bias(config.has_bias)
}

fn out_projection(config: &AttentionConfig) -> LinearConfig {
    LinearConfig::new(config.inner_size(), config.hidden_size).with_bias(config.has_bias)
}

fn expect_projection(label: &str, linear: &Linear, expected: &LinearConfig) -> Result<()> {
    checks::expect_shape(label, linear.weight(), &[expected.output_dim, expected.input_dim])?;
    if linear.config() != expected {
        candle_core::bail!("{label}: expected {:?}, got {:?}", expected, linear.config());
    }
    Ok(())
}

fn broadcastable(dims: &[usize], target: [usize; 4]) -> bool {
    dims.len() == 4 && dims.iter().zip(target).all(|(&d, t)| d == t || d == 1)
}
