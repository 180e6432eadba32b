//! Building blocks for transformer layers.
//!
//! This crate hosts the leaf components that encoder and decoder layers are
//! assembled from: projections, activations, layer normalisation,
//! position-wise feed-forward stacks and the dropout/residual helper. Every
//! component consumes `(batch, seq, hidden)` tensors and follows the
//! precision rules carried by [`context::ForwardContext`].

use thiserror::Error;

pub mod activations;
pub mod checks;
pub mod context;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod residual;

pub use context::{ForwardContext, Mode, PrecisionPolicy};

/// Errors raised while describing or assembling layer components.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayerError {
    /// The activation name is not part of the supported catalogue.
    #[error("unknown activation '{0}' (expected one of gelu, gelu_fast, relu, silu, linear)")]
    UnknownActivation(String),
}
