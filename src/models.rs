//! Data models and structures
//!
//! Defines the image assets handed in by the document pipeline, the optimized
//! images handed back, and the per-image/per-batch statistics recorded along
//! the way.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Semantic role of an image inside a generated document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImageRole {
    Photo,
    Logo,
    Graphics,
    Text,
}

impl ImageRole {
    pub const ALL: [ImageRole; 4] = [
        ImageRole::Photo,
        ImageRole::Logo,
        ImageRole::Graphics,
        ImageRole::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageRole::Photo => "photo",
            ImageRole::Logo => "logo",
            ImageRole::Graphics => "graphics",
            ImageRole::Text => "text",
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "photo" => Ok(ImageRole::Photo),
            "logo" => Ok(ImageRole::Logo),
            "graphics" => Ok(ImageRole::Graphics),
            "text" => Ok(ImageRole::Text),
            other => Err(format!("unknown image role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when neither axis exceeds `bound`.
    pub fn fits_within(&self, bound: &Dimensions) -> bool {
        self.width <= bound.width && self.height <= bound.height
    }

    /// True when both axes are strictly below `floor`.
    pub fn is_below(&self, floor: &Dimensions) -> bool {
        self.width < floor.width && self.height < floor.height
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Encodings the optimizer can emit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    pub fn supports_alpha(&self) -> bool {
        matches!(self, OutputFormat::Png | OutputFormat::WebP)
    }

    /// Whether the encoder honours a quality setting.
    pub fn is_lossy(&self) -> bool {
        matches!(self, OutputFormat::Jpeg)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::WebP => image::ImageFormat::WebP,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::WebP),
            other => Err(format!("unsupported output format '{}'", other)),
        }
    }
}

/// Sniff the container format from magic bytes.
pub fn detect_format(bytes: &[u8]) -> Option<OutputFormat> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(OutputFormat::Jpeg),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some(OutputFormat::Png),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => {
            Some(OutputFormat::WebP)
        }
        _ => None,
    }
}

/// One image to be embedded in a generated document.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    /// Source path or URL; used for role inference and logging.
    pub identifier: String,
    pub data: Vec<u8>,
    /// Role declared by the caller, if any.
    pub role_hint: Option<ImageRole>,
    /// Original dimensions when already known to the caller.
    pub dimensions: Option<Dimensions>,
}

impl ImageAsset {
    pub fn new(identifier: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            identifier: identifier.into(),
            data,
            role_hint: None,
            dimensions: None,
        }
    }

    pub fn with_role(mut self, role: ImageRole) -> Self {
        self.role_hint = Some(role);
        self
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

/// Which branch of the compression algorithm produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Below the minimum-dimension floor; bytes returned untouched.
    Passthrough,
    /// Single encode at the role's default quality.
    Standard,
    /// Quality lowered in steps until the size budget was met.
    Aggressive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizedImage {
    #[serde(skip)]
    pub data: Vec<u8>,
    pub original_size: usize,
    pub optimized_size: usize,
    /// `(original - optimized) / original`
    pub compression_ratio: f64,
    pub original_dimensions: Option<Dimensions>,
    /// `None` only for degraded results whose input could not be decoded.
    pub dimensions: Option<Dimensions>,
    pub format: Option<OutputFormat>,
    /// Quality the output was encoded at; `None` when the original bytes were
    /// returned. Lossless encodings record the selected quality unchanged.
    pub quality_used: Option<u8>,
    pub technique: Technique,
    pub processing_time: Duration,
    pub degraded: bool,
}

impl OptimizedImage {
    /// Original bytes substituted after every compression attempt failed.
    pub fn degraded(
        original: Vec<u8>,
        dimensions: Option<Dimensions>,
        processing_time: Duration,
    ) -> Self {
        let size = original.len();
        Self {
            format: detect_format(&original),
            data: original,
            original_size: size,
            optimized_size: size,
            compression_ratio: 0.0,
            original_dimensions: dimensions,
            dimensions,
            quality_used: None,
            technique: Technique::Passthrough,
            processing_time,
            degraded: true,
        }
    }

    pub fn bytes_saved(&self) -> usize {
        self.original_size.saturating_sub(self.optimized_size)
    }
}

/// Signed compression ratio; negative when the output grew.
pub fn compression_ratio(original: usize, optimized: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (original as f64 - optimized as f64) / original as f64
}

/// Statistics for one asset, fed to the metrics recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageStats {
    pub role: ImageRole,
    pub original_size: usize,
    pub optimized_size: usize,
    pub processing_time: Duration,
    pub attempts: u32,
    pub cache_hit: bool,
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchStats {
    pub total_assets: usize,
    pub total_original_size: usize,
    pub total_optimized_size: usize,
    pub overall_compression_ratio: f64,
    pub success_count: usize,
    pub degraded_count: usize,
    /// Assets dropped before optimization (fetch failures).
    pub omitted_count: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub duration: Duration,
}

impl BatchStats {
    /// Aggregate per-image results into batch totals.
    pub fn from_results(results: &[OptimizedImage], image_stats: &[ImageStats]) -> Self {
        let total_original_size: usize = results.iter().map(|r| r.original_size).sum();
        let total_optimized_size: usize = results.iter().map(|r| r.optimized_size).sum();
        let degraded_count = results.iter().filter(|r| r.degraded).count();
        let cache_hits = image_stats.iter().filter(|s| s.cache_hit).count();

        Self {
            total_assets: results.len(),
            total_original_size,
            total_optimized_size,
            overall_compression_ratio: compression_ratio(total_original_size, total_optimized_size),
            success_count: results.len() - degraded_count,
            degraded_count,
            omitted_count: 0,
            cache_hits,
            cache_misses: image_stats.len() - cache_hits,
            duration: Duration::ZERO,
        }
    }

    /// Fraction of requested assets that were degraded or omitted.
    pub fn failure_fraction(&self) -> f64 {
        let requested = self.total_assets + self.omitted_count;
        if requested == 0 {
            return 0.0;
        }
        (self.degraded_count + self.omitted_count) as f64 / requested as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&ImageRole::Graphics).unwrap();
        assert_eq!(json, "\"graphics\"");

        let role: ImageRole = serde_json::from_str("\"logo\"").unwrap();
        assert_eq!(role, ImageRole::Logo);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("webp".parse::<OutputFormat>().unwrap(), OutputFormat::WebP);
        assert!("gif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(OutputFormat::Jpeg));
        assert_eq!(
            detect_format(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]),
            Some(OutputFormat::Png)
        );
        assert_eq!(
            detect_format(&[
                0x52, 0x49, 0x46, 0x46, 0x00, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50
            ]),
            Some(OutputFormat::WebP)
        );
        assert_eq!(detect_format(&[0x00, 0x01, 0x02]), None);
        assert_eq!(detect_format(&[]), None);
    }

    #[test]
    fn test_dimensions_bounds() {
        let ceiling = Dimensions::new(400, 400);
        assert!(Dimensions::new(400, 300).fits_within(&ceiling));
        assert!(!Dimensions::new(401, 300).fits_within(&ceiling));

        let floor = Dimensions::new(50, 50);
        assert!(Dimensions::new(40, 40).is_below(&floor));
        // Only one axis below the floor does not count.
        assert!(!Dimensions::new(40, 60).is_below(&floor));
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(100, 25), 0.75);
        assert_eq!(compression_ratio(100, 100), 0.0);
        assert!(compression_ratio(100, 120) < 0.0);
        assert_eq!(compression_ratio(0, 0), 0.0);
    }

    #[test]
    fn test_degraded_result() {
        let image = OptimizedImage::degraded(vec![1, 2, 3], None, Duration::from_millis(3));
        assert!(image.degraded);
        assert_eq!(image.original_size, 3);
        assert_eq!(image.optimized_size, 3);
        assert_eq!(image.compression_ratio, 0.0);
        assert_eq!(image.quality_used, None);
        assert_eq!(image.bytes_saved(), 0);
    }

    #[test]
    fn test_failure_fraction() {
        let stats = BatchStats {
            total_assets: 3,
            degraded_count: 1,
            omitted_count: 1,
            ..Default::default()
        };
        assert_eq!(stats.failure_fraction(), 0.5);
        assert_eq!(BatchStats::default().failure_fraction(), 0.0);
    }
}
