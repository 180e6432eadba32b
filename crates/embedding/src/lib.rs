//! Position information for transformer attention.
//!
//! The positional module exposes the [`PositionBias`] capability that
//! attention blocks consult for an additive score bias, and the learned
//! bucketed [`RelativePositionEmbedding`] that implements it.

pub mod positional;

pub use positional::{PositionBias, RelativePositionConfig, RelativePositionEmbedding};
