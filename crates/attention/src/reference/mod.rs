//! Portable, exact attention implementations.
//!
//! These paths favour clarity over absolute performance and serve as the
//! baseline the layer stacks are built and tested against.

pub mod multi_head;

pub use multi_head::MultiHeadedAttention;
