//! Transformer encoder and encoder-decoder layers.
//!
//! [`TransformerLayer`] composes self-attention and a feed-forward block;
//! [`TransformerDecoderLayer`] adds cross-attention over an encoder output in
//! between. Both support the post-norm and pre-norm residual layouts selected
//! by [`LayerNormPositioning`], and an optional relative position bias.
//!
//! Sub-layers are trait objects from the `layers`, `attention` and
//! `embedding` crates. [`TransformerLayer::new`] builds the reference
//! implementations from a [`ResolvedLayerConfig`]; `from_parts` accepts
//! custom ones.
//!
//! ```no_run
//! use candle_core::{DType, Device, Tensor};
//! use layers::ForwardContext;
//! use transformer::{LayerConfig, TransformerLayer};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = LayerConfig::new(8, 2, 32).resolve()?;
//! let layer = TransformerLayer::new(&config, &Device::Cpu, DType::F32)?;
//! let hidden = Tensor::randn(0f32, 1.0, (2, 4, 8), &Device::Cpu)?;
//! let mask = Tensor::zeros((2, 1, 4, 4), DType::F32, &Device::Cpu)?;
//! let output = layer.forward(&hidden, &mask, &ForwardContext::eval(DType::F32))?;
//! assert_eq!(output.dims(), &[2, 4, 8]);
//! # Ok(())
//! # }
//! ```

mod components;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod stack;

pub use config::{
    ConfigError, LayerConfig, LayerNormPositioning, ResolvedLayerConfig, ResolvedStackConfig,
    StackConfig,
};
pub use decoder::{DecoderParts, TransformerDecoderLayer};
pub use encoder::{EncoderParts, TransformerLayer};
pub use stack::{TransformerDecoder, TransformerEncoder};
