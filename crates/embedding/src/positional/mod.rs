//! Additive position biases for attention scores.

pub mod relative;

use candle_core::{Result, Tensor};

pub use relative::{relative_position_bucket, RelativePositionConfig, RelativePositionEmbedding};

/// Produces a bias added to raw attention scores.
///
/// Given query-side hidden states `(batch, q_len, hidden)` and key-side hidden
/// states `(batch, k_len, hidden)`, returns a tensor of shape
/// `(1, heads, q_len, k_len)` that broadcasts over the batch. Only the
/// sequence lengths of the inputs are consulted.
pub trait PositionBias: Send + Sync {
    fn bias(&self, query_hidden: &Tensor, key_hidden: &Tensor) -> Result<Tensor>;
}
