//! Optimization profiles and the configuration they are resolved from
//!
//! A [`ProfileConfig`] is the raw operator configuration (environment or a
//! JSON file). [`resolve_profile`] validates it, applies per-job overrides and
//! produces the single immutable [`OptimizationProfile`] shared by every asset
//! of one document.

use crate::cache::ContentHash;
use crate::models::{Dimensions, ImageRole, OutputFormat};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct QualityRange {
    pub min: u8,
    pub default: u8,
    pub max: u8,
}

impl QualityRange {
    pub const fn new(min: u8, default: u8, max: u8) -> Self {
        Self { min, default, max }
    }

    pub fn contains(&self, quality: u8) -> bool {
        (self.min..=self.max).contains(&quality)
    }

    fn validate(&self, role: ImageRole) -> Result<()> {
        if self.min < 1 || self.max > 100 {
            return Err(Error::Config(format!(
                "{} quality bounds must lie within 1..=100 (got {}..={})",
                role, self.min, self.max
            )));
        }
        if !(self.min <= self.default && self.default <= self.max) {
            return Err(Error::Config(format!(
                "{} quality must satisfy min <= default <= max (got {}/{}/{})",
                role, self.min, self.default, self.max
            )));
        }
        Ok(())
    }
}

impl FromStr for QualityRange {
    type Err = String;

    /// Parses `min,default,max`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [min, default, max] = parts.as_slice() else {
            return Err(format!("expected 'min,default,max', got '{}'", s));
        };
        let parse = |v: &str| {
            v.parse::<u8>()
                .map_err(|e| format!("invalid quality '{}': {}", v, e))
        };
        Ok(Self::new(parse(*min)?, parse(*default)?, parse(*max)?))
    }
}

/// Quality ranges for every role. Lookups are exhaustive over [`ImageRole`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RoleQualities {
    pub photo: QualityRange,
    pub logo: QualityRange,
    pub graphics: QualityRange,
    pub text: QualityRange,
}

impl RoleQualities {
    pub fn get(&self, role: ImageRole) -> QualityRange {
        match role {
            ImageRole::Photo => self.photo,
            ImageRole::Logo => self.logo,
            ImageRole::Graphics => self.graphics,
            ImageRole::Text => self.text,
        }
    }

    fn get_mut(&mut self, role: ImageRole) -> &mut QualityRange {
        match role {
            ImageRole::Photo => &mut self.photo,
            ImageRole::Logo => &mut self.logo,
            ImageRole::Graphics => &mut self.graphics,
            ImageRole::Text => &mut self.text,
        }
    }
}

impl Default for RoleQualities {
    fn default() -> Self {
        Self {
            photo: QualityRange::new(50, 75, 85),
            logo: QualityRange::new(70, 85, 95),
            graphics: QualityRange::new(60, 80, 90),
            text: QualityRange::new(70, 85, 95),
        }
    }
}

/// Raw operator configuration. Every field has a default so partial JSON
/// files and sparse environments are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfileConfig {
    pub qualities: RoleQualities,
    pub max_dimensions: Dimensions,
    pub min_dimensions: Dimensions,
    pub aggressive: bool,
    pub preferred_format: OutputFormat,
    pub max_retries: u32,
    /// Quality decrement per aggressive-mode or retry step.
    pub quality_step: u8,
    /// Size budget per output pixel used by aggressive mode.
    pub target_bytes_per_pixel: f64,
    /// Allowed spread between assets' offsets from their role default.
    pub quality_tolerance: u8,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            qualities: RoleQualities::default(),
            max_dimensions: Dimensions::new(1600, 1600),
            min_dimensions: Dimensions::new(50, 50),
            aggressive: false,
            preferred_format: OutputFormat::Jpeg,
            max_retries: 2,
            quality_step: 5,
            target_bytes_per_pixel: 0.35,
            quality_tolerance: 25,
        }
    }
}

pub(crate) fn env_value<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{} has invalid value '{}': {}", name, raw, e))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(Error::Config(format!("{}: {}", name, e))),
    }
}

impl ProfileConfig {
    /// Build from `DOCIMG_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Some(v) = env_value("DOCIMG_AGGRESSIVE")? {
            config.aggressive = v;
        }
        if let Some(v) = env_value("DOCIMG_MAX_WIDTH")? {
            config.max_dimensions.width = v;
        }
        if let Some(v) = env_value("DOCIMG_MAX_HEIGHT")? {
            config.max_dimensions.height = v;
        }
        if let Some(v) = env_value("DOCIMG_MIN_WIDTH")? {
            config.min_dimensions.width = v;
        }
        if let Some(v) = env_value("DOCIMG_MIN_HEIGHT")? {
            config.min_dimensions.height = v;
        }
        if let Some(v) = env_value("DOCIMG_FORMAT")? {
            config.preferred_format = v;
        }
        if let Some(v) = env_value("DOCIMG_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = env_value("DOCIMG_QUALITY_STEP")? {
            config.quality_step = v;
        }
        if let Some(v) = env_value("DOCIMG_BYTES_PER_PIXEL")? {
            config.target_bytes_per_pixel = v;
        }
        if let Some(v) = env_value("DOCIMG_QUALITY_TOLERANCE")? {
            config.quality_tolerance = v;
        }
        for role in ImageRole::ALL {
            let name = format!("DOCIMG_{}_QUALITY", role.as_str().to_ascii_uppercase());
            if let Some(range) = env_value::<QualityRange>(&name)? {
                *config.qualities.get_mut(role) = range;
            }
        }

        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Per-job overrides supplied by the document pipeline.
#[derive(Debug, Clone, Default)]
pub struct ProfileContext {
    pub aggressive: Option<bool>,
    pub max_dimensions: Option<Dimensions>,
}

/// Immutable settings governing every optimization decision of one batch.
///
/// Only obtainable through [`resolve_profile`], so every instance has passed
/// validation.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationProfile {
    qualities: RoleQualities,
    max_dimensions: Dimensions,
    min_dimensions: Dimensions,
    aggressive: bool,
    preferred_format: OutputFormat,
    max_retries: u32,
    quality_step: u8,
    target_bytes_per_pixel: f64,
    quality_tolerance: u8,
}

/// Fields that influence the output for one role; hashed into cache keys.
#[derive(Serialize)]
struct SignatureFields {
    role: ImageRole,
    quality: QualityRange,
    max_dimensions: Dimensions,
    min_dimensions: Dimensions,
    aggressive: bool,
    preferred_format: OutputFormat,
    max_retries: u32,
    quality_step: u8,
    target_bytes_per_pixel: f64,
}

impl OptimizationProfile {
    pub fn quality(&self, role: ImageRole) -> QualityRange {
        self.qualities.get(role)
    }

    pub fn max_dimensions(&self) -> Dimensions {
        self.max_dimensions
    }

    pub fn min_dimensions(&self) -> Dimensions {
        self.min_dimensions
    }

    pub fn aggressive(&self) -> bool {
        self.aggressive
    }

    pub fn preferred_format(&self) -> OutputFormat {
        self.preferred_format
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn quality_step(&self) -> u8 {
        self.quality_step
    }

    pub fn target_bytes_per_pixel(&self) -> f64 {
        self.target_bytes_per_pixel
    }

    pub fn quality_tolerance(&self) -> u8 {
        self.quality_tolerance
    }

    /// Byte budget aggressive mode aims for at the given output size.
    pub fn size_budget(&self, output: Dimensions) -> usize {
        (output.pixel_count() as f64 * self.target_bytes_per_pixel).ceil() as usize
    }

    /// Quality for retry `attempt` (0-based): one step lower per attempt,
    /// floored at the role minimum.
    pub fn quality_for_attempt(&self, role: ImageRole, attempt: u32) -> u8 {
        let range = self.quality(role);
        let drop = (self.quality_step as u32).saturating_mul(attempt);
        let lowered = (range.default as u32).saturating_sub(drop);
        lowered.max(range.min as u32) as u8
    }

    /// Stable digest of everything that affects output for `role`.
    pub fn signature(&self, role: ImageRole) -> Result<ContentHash> {
        ContentHash::compute_serializable(&SignatureFields {
            role,
            quality: self.quality(role),
            max_dimensions: self.max_dimensions,
            min_dimensions: self.min_dimensions,
            aggressive: self.aggressive,
            preferred_format: self.preferred_format,
            max_retries: self.max_retries,
            quality_step: self.quality_step,
            target_bytes_per_pixel: self.target_bytes_per_pixel,
        })
    }
}

/// Produce the one profile for a document job.
///
/// This is the only failure that aborts a whole batch.
pub fn resolve_profile(
    config: &ProfileConfig,
    context: &ProfileContext,
) -> Result<Arc<OptimizationProfile>> {
    let profile = OptimizationProfile {
        qualities: config.qualities,
        max_dimensions: context.max_dimensions.unwrap_or(config.max_dimensions),
        min_dimensions: config.min_dimensions,
        aggressive: context.aggressive.unwrap_or(config.aggressive),
        preferred_format: config.preferred_format,
        max_retries: config.max_retries,
        quality_step: config.quality_step,
        target_bytes_per_pixel: config.target_bytes_per_pixel,
        quality_tolerance: config.quality_tolerance,
    };

    for role in ImageRole::ALL {
        let range = profile.quality(role);
        range.validate(role)?;
        // Retries and aggressive mode can push any asset down to its role
        // minimum while another stays at its default.
        if range.default - range.min > profile.quality_tolerance {
            return Err(Error::Config(format!(
                "{} quality can drop {} below its default, beyond the batch tolerance of {}",
                role,
                range.default - range.min,
                profile.quality_tolerance
            )));
        }
    }

    let (min, max) = (profile.min_dimensions, profile.max_dimensions);
    if min.width >= max.width || min.height >= max.height {
        return Err(Error::Config(format!(
            "min dimensions {} must be below max dimensions {} on both axes",
            min, max
        )));
    }
    if profile.quality_step == 0 {
        return Err(Error::Config("quality step must be at least 1".to_string()));
    }
    if !(profile.target_bytes_per_pixel.is_finite() && profile.target_bytes_per_pixel > 0.0) {
        return Err(Error::Config(format!(
            "target bytes per pixel must be positive (got {})",
            profile.target_bytes_per_pixel
        )));
    }

    tracing::debug!(
        aggressive = profile.aggressive,
        max = %profile.max_dimensions,
        format = ?profile.preferred_format,
        "Resolved optimization profile"
    );

    Ok(Arc::new(profile))
}
