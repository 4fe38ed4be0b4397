//! Image compression
//!
//! Resizes and re-encodes a single image under an [`OptimizationProfile`].
//! Implementations are synchronous and CPU-bound; the coordinator runs them
//! on its worker pool.

pub mod engine;
pub mod mock;

pub use engine::{select_format, target_dimensions, ImageCompressor};
pub use mock::MockCompressor;

use crate::error::CompressionError;
use crate::models::{ImageRole, OptimizedImage};
use crate::profile::OptimizationProfile;

pub trait Compressor: Send + Sync {
    /// Compress starting from `quality` instead of the role default. Used by
    /// retries, which step the quality down.
    fn compress_at(
        &self,
        data: &[u8],
        role: ImageRole,
        profile: &OptimizationProfile,
        quality: u8,
    ) -> Result<OptimizedImage, CompressionError>;

    fn compress(
        &self,
        data: &[u8],
        role: ImageRole,
        profile: &OptimizationProfile,
    ) -> Result<OptimizedImage, CompressionError> {
        self.compress_at(data, role, profile, profile.quality(role).default)
    }
}
