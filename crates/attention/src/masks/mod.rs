//! Mask utilities shared by attention implementations.
//!
//! All masks produced here are additive tensors with dtype `f32`, shaped
//! `(batch, 1, q_len, k_len)` so that they broadcast over heads. Values are
//! either `0.0` (keep) or [`MASK_FILL`] (discard). A large finite negative
//! value keeps fully masked rows numerically defined after softmax.

pub mod causal;
pub mod padding;

use candle_core::{DType, Result, Tensor};

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

/// Additive value for suppressed positions.
pub const MASK_FILL: f32 = -10000.0;

pub use causal::build_causal_mask;
pub use padding::{padding_mask_from_booleans, padding_mask_from_lengths};

/// Merges two additive masks: a position stays visible only if both allow it.
///
/// The inputs may differ in any broadcastable dimension.
pub fn combine_masks(left: &Tensor, right: &Tensor) -> Result<Tensor> {
    left.to_dtype(MASK_DTYPE)?
        .broadcast_minimum(&right.to_dtype(MASK_DTYPE)?)
}
