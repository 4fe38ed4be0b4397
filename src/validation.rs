//! Validation of compression output
//!
//! Decides whether one compression attempt is acceptable. A failure here is
//! an internal signal for the coordinator to retry with a lower quality.

use crate::error::ValidationError;
use crate::models::{ImageRole, OptimizedImage};
use crate::profile::OptimizationProfile;

pub fn validate(
    image: &OptimizedImage,
    profile: &OptimizationProfile,
    role: ImageRole,
) -> Result<(), ValidationError> {
    if let Some(dims) = image.dimensions {
        let ceiling = profile.max_dimensions();
        if !dims.fits_within(&ceiling) {
            return Err(ValidationError::DimensionsExceeded {
                width: dims.width,
                height: dims.height,
                max_width: ceiling.width,
                max_height: ceiling.height,
            });
        }
        if let Some(original) = image.original_dimensions {
            if !dims.fits_within(&original) {
                return Err(ValidationError::Upscaled {
                    width: dims.width,
                    height: dims.height,
                    original_width: original.width,
                    original_height: original.height,
                });
            }
        }
    }

    if let Some(quality) = image.quality_used {
        let range = profile.quality(role);
        if !range.contains(quality) {
            return Err(ValidationError::QualityOutOfRange {
                quality,
                min: range.min,
                max: range.max,
            });
        }
    }

    if image.optimized_size > image.original_size {
        return Err(ValidationError::NegativeRatio {
            original: image.original_size,
            optimized: image.optimized_size,
        });
    }
    if !(0.0..1.0).contains(&image.compression_ratio) {
        return Err(ValidationError::RatioOutOfRange(image.compression_ratio));
    }

    Ok(())
}
