//! Error handling and custom error types
//!
//! Provides unified error handling across the optimizer using thiserror.
//! Only [`Error::Config`] aborts a whole batch; compression and validation
//! failures stay local to one asset and drive its retry/fallback path.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to fetch asset '{identifier}': {message}")]
    Fetch { identifier: String, message: String },

    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Batch consistency violated: {0}")]
    Consistency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure of a single compression attempt. Retryable within an asset's budget.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompressionError {
    #[error("undecodable input: {0}")]
    Decode(String),

    #[error("encoder failure: {0}")]
    Encode(String),

    #[error("compression exceeded deadline of {after:?}")]
    Timeout { after: Duration },

    #[error("worker failure: {0}")]
    Worker(String),
}

/// An attempt produced output that breaks an [`crate::models::OptimizedImage`]
/// invariant. Never surfaced to callers; it only triggers a retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("output {width}x{height} exceeds ceiling {max_width}x{max_height}")]
    DimensionsExceeded {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("output {width}x{height} is larger than original {original_width}x{original_height}")]
    Upscaled {
        width: u32,
        height: u32,
        original_width: u32,
        original_height: u32,
    },

    #[error("quality {quality} outside [{min}, {max}]")]
    QualityOutOfRange { quality: u8, min: u8, max: u8 },

    #[error("output ({optimized} bytes) is larger than input ({original} bytes)")]
    NegativeRatio { original: usize, optimized: usize },

    #[error("compression ratio {0} outside [0, 1)")]
    RatioOutOfRange(f64),
}

pub type Result<T> = std::result::Result<T, Error>;
