//! Core traits and types shared across attention implementations.
//!
//! Implementations take hidden states laid out `(batch, seq_len, hidden)` and
//! return the attended sequence with the query's length and the configured
//! hidden width. Precision follows the supplied
//! [`PrecisionPolicy`](layers::PrecisionPolicy): scores and softmax run in the
//! compute dtype and the output is returned in the storage dtype.

pub mod config;
pub mod errors;

use candle_core::{Result, Tensor};
use layers::ForwardContext;

pub use config::AttentionConfig;
pub use errors::AttentionError;

/// Unified interface for attention kernels.
///
/// * `key` and `value` share the layout `(batch, k_len, hidden)`.
/// * `query` is `(batch, q_len, hidden)`; the output mirrors its layout.
/// * `mask` is additive and broadcastable to `(batch, 1, q_len, k_len)`.
/// * `position_bias`, when present, is `(1 or batch, heads, q_len, k_len)` and
///   is added to the raw scores before they are scaled.
///
/// Self-attention passes the same tensor three times. Cross-attention passes
/// the encoder memory as `key` and `value`.
pub trait Attention: Send + Sync {
    fn attend(
        &self,
        key: &Tensor,
        value: &Tensor,
        query: &Tensor,
        mask: &Tensor,
        position_bias: Option<&Tensor>,
        ctx: &ForwardContext,
    ) -> Result<Tensor>;
}
