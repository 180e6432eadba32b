//! Multi-head attention for transformer encoder and decoder layers.
//!
//! Hidden states use the `(batch, seq_len, hidden)` layout. An [`Attention`]
//! implementation projects key, value and query inputs into `heads_num`
//! heads, scores them, adds an optional position bias and an additive mask,
//! and projects the weighted values back to the hidden width.
//!
//! Masks are additive `f32` tensors broadcastable to
//! `(batch, 1, q_len, k_len)`: `0.0` keeps a position and [`masks::MASK_FILL`]
//! suppresses it. Builders for causal and padding masks live in [`masks`].
//!
//! Attention-probability dropout only fires when the
//! [`ForwardContext`](layers::ForwardContext) is in training mode.

pub mod core;
pub mod masks;
pub mod reference;

pub use core::{Attention, AttentionConfig, AttentionError};
pub use reference::MultiHeadedAttention;
