//! Error types emitted by attention implementations.

use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape for {context}")]
    InvalidShape { context: String },
    /// The configuration cannot describe a valid attention block.
    #[error("invalid attention config: {0}")]
    InvalidConfig(String),
}

impl From<AttentionError> for candle_core::Error {
    fn from(err: AttentionError) -> Self {
        candle_core::Error::wrap(err)
    }
}
