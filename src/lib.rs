//! Residual-quantized semantic IDs.
//!
//! Item feature vectors are compressed by an RQ-VAE into short sequences of
//! codebook indices, then deduplicated corpus-wide so every item owns a
//! unique token sequence for the downstream generative recommender.

pub mod config;
pub mod core;
pub mod error;
pub mod simd;
pub mod storage;
pub mod tokenizer;

pub use error::{Result, SemIdError};
