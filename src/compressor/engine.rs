use super::Compressor;
use crate::error::CompressionError;
use crate::models::{
    compression_ratio, detect_format, Dimensions, ImageRole, OptimizedImage, OutputFormat,
    Technique,
};
use crate::profile::OptimizationProfile;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::time::Instant;
use tracing::debug;

/// Compressor backed by the `image` crate.
///
/// Every step is deterministic: identical bytes and profile always produce
/// byte-identical output, and re-encoding drops all source metadata.
pub struct ImageCompressor {
    filter: FilterType,
}

impl ImageCompressor {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }

    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    fn passthrough(
        data: &[u8],
        dims: Dimensions,
        technique: Technique,
        started: Instant,
    ) -> OptimizedImage {
        OptimizedImage {
            data: data.to_vec(),
            original_size: data.len(),
            optimized_size: data.len(),
            compression_ratio: 0.0,
            original_dimensions: Some(dims),
            dimensions: Some(dims),
            format: detect_format(data),
            quality_used: None,
            technique,
            processing_time: started.elapsed(),
            degraded: false,
        }
    }
}

impl Default for ImageCompressor {
    fn default() -> Self {
        Self::new()
    }
}

/// Uniformly scale `original` down to fit `max`. Never scales up.
pub fn target_dimensions(original: Dimensions, max: Dimensions) -> Dimensions {
    if original.fits_within(&max) {
        return original;
    }
    let scale = f64::min(
        max.width as f64 / original.width as f64,
        max.height as f64 / original.height as f64,
    );
    let width = ((original.width as f64 * scale).round() as u32).clamp(1, max.width);
    let height = ((original.height as f64 * scale).round() as u32).clamp(1, max.height);
    Dimensions::new(width, height)
}

/// Choose the output encoding.
///
/// Photos always take the preferred format. Other roles keep an alpha-capable
/// encoding when they carry transparency the preferred format cannot hold.
pub fn select_format(
    role: ImageRole,
    preferred: OutputFormat,
    native: Option<OutputFormat>,
    transparent: bool,
) -> OutputFormat {
    if role == ImageRole::Photo || !transparent || preferred.supports_alpha() {
        return preferred;
    }
    match native {
        Some(format) if format.supports_alpha() => format,
        _ => OutputFormat::Png,
    }
}

fn has_transparency(image: &DynamicImage) -> bool {
    match image {
        DynamicImage::ImageRgba8(rgba) => rgba.pixels().any(|p| p.0[3] < u8::MAX),
        DynamicImage::ImageLumaA8(luma) => luma.pixels().any(|p| p.0[1] < u8::MAX),
        other if other.color().has_alpha() => {
            other.to_rgba8().pixels().any(|p| p.0[3] < u8::MAX)
        }
        _ => false,
    }
}

/// Composite onto white; JPEG has no alpha channel.
fn flatten(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| ((c as u32 * a as u32 + 255 * (255 - a as u32)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn encode(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, CompressionError> {
    let mut buffer = Vec::new();
    let result = match format {
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            flatten(image).write_with_encoder(encoder)
        }
        OutputFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, PngFilter::Adaptive);
            image.write_with_encoder(encoder)
        }
        OutputFormat::WebP => {
            let encoder = WebPEncoder::new_lossless(&mut buffer);
            if image.color().has_alpha() {
                image.to_rgba8().write_with_encoder(encoder)
            } else {
                image.to_rgb8().write_with_encoder(encoder)
            }
        }
    };
    result.map_err(|e| CompressionError::Encode(format!("{:?}: {}", format, e)))?;
    Ok(buffer)
}

impl Compressor for ImageCompressor {
    fn compress_at(
        &self,
        data: &[u8],
        role: ImageRole,
        profile: &OptimizationProfile,
        quality: u8,
    ) -> Result<OptimizedImage, CompressionError> {
        let started = Instant::now();
        let technique = if profile.aggressive() {
            Technique::Aggressive
        } else {
            Technique::Standard
        };

        let image =
            image::load_from_memory(data).map_err(|e| CompressionError::Decode(e.to_string()))?;
        let original = Dimensions::new(image.width(), image.height());

        if original.is_below(&profile.min_dimensions()) {
            debug!(dims = %original, "Below minimum dimensions, passing through");
            return Ok(Self::passthrough(
                data,
                original,
                Technique::Passthrough,
                started,
            ));
        }

        let target = target_dimensions(original, profile.max_dimensions());
        let image = if target == original {
            image
        } else {
            image.resize_exact(target.width, target.height, self.filter)
        };

        let native = detect_format(data);
        let format = select_format(
            role,
            profile.preferred_format(),
            native,
            has_transparency(&image),
        );

        let range = profile.quality(role);
        let mut quality = quality.clamp(range.min, range.max);
        let mut encoded = encode(&image, format, quality)?;

        if profile.aggressive() && format.is_lossy() {
            let budget = profile.size_budget(target);
            while encoded.len() > budget && quality > range.min {
                quality = quality.saturating_sub(profile.quality_step()).max(range.min);
                encoded = encode(&image, format, quality)?;
            }
            debug!(quality, budget, size = encoded.len(), "Aggressive reduction finished");
        }

        // Re-encoding at the same size must not inflate the asset.
        if target == original && encoded.len() >= data.len() {
            debug!(
                original = data.len(),
                encoded = encoded.len(),
                "Re-encode gave no gain, keeping original bytes"
            );
            return Ok(Self::passthrough(data, original, technique, started));
        }

        Ok(OptimizedImage {
            original_size: data.len(),
            optimized_size: encoded.len(),
            compression_ratio: compression_ratio(data.len(), encoded.len()),
            data: encoded,
            original_dimensions: Some(original),
            dimensions: Some(target),
            format: Some(format),
            quality_used: Some(quality),
            technique,
            processing_time: started.elapsed(),
            degraded: false,
        })
    }
}
