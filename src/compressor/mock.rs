use super::Compressor;
use crate::error::CompressionError;
use crate::models::{compression_ratio, ImageRole, OptimizedImage, Technique};
use crate::profile::OptimizationProfile;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scriptable compressor for coordinator tests.
///
/// Halves the input bytes and reports the requested quality. Clones share
/// call counters, so a clone kept by the test can observe calls made through
/// the coordinator.
#[derive(Clone)]
pub struct MockCompressor {
    call_count: Arc<Mutex<usize>>,
    qualities_seen: Arc<Mutex<Vec<u8>>>,
    failures_remaining: Arc<Mutex<usize>>,
    always_fail: bool,
    quality_override: Option<u8>,
    delay: Duration,
}

impl MockCompressor {
    pub fn new() -> Self {
        Self {
            call_count: Arc::new(Mutex::new(0)),
            qualities_seen: Arc::new(Mutex::new(Vec::new())),
            failures_remaining: Arc::new(Mutex::new(0)),
            always_fail: false,
            quality_override: None,
            delay: Duration::ZERO,
        }
    }

    /// Fail the next `count` calls with an encoder error.
    pub fn with_failures(self, count: usize) -> Self {
        *self.failures_remaining.lock().unwrap() = count;
        self
    }

    pub fn with_failure(mut self, always_fail: bool) -> Self {
        self.always_fail = always_fail;
        self
    }

    /// Report this quality regardless of what was requested.
    pub fn with_quality_override(mut self, quality: u8) -> Self {
        self.quality_override = Some(quality);
        self
    }

    /// Block the calling worker thread for `delay` on each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn get_call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn get_qualities_seen(&self) -> Vec<u8> {
        self.qualities_seen.lock().unwrap().clone()
    }
}

impl Default for MockCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for MockCompressor {
    fn compress_at(
        &self,
        data: &[u8],
        role: ImageRole,
        profile: &OptimizationProfile,
        quality: u8,
    ) -> Result<OptimizedImage, CompressionError> {
        *self.call_count.lock().unwrap() += 1;
        self.qualities_seen.lock().unwrap().push(quality);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        if self.always_fail {
            return Err(CompressionError::Encode("Mock failure".to_string()));
        }
        {
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CompressionError::Encode("Mock failure".to_string()));
            }
        }

        let range = profile.quality(role);
        let output = data[..data.len() / 2].to_vec();
        Ok(OptimizedImage {
            original_size: data.len(),
            optimized_size: output.len(),
            compression_ratio: compression_ratio(data.len(), output.len()),
            data: output,
            original_dimensions: None,
            dimensions: None,
            format: None,
            quality_used: Some(
                self.quality_override
                    .unwrap_or_else(|| quality.clamp(range.min, range.max)),
            ),
            technique: if profile.aggressive() {
                Technique::Aggressive
            } else {
                Technique::Standard
            },
            processing_time: Duration::from_millis(1),
            degraded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{resolve_profile, ProfileConfig, ProfileContext};

    fn profile() -> Arc<OptimizationProfile> {
        resolve_profile(&ProfileConfig::default(), &ProfileContext::default()).unwrap()
    }

    #[test]
    fn test_mock_halves_input() {
        let compressor = MockCompressor::new();
        let result = compressor
            .compress(&[1, 2, 3, 4], ImageRole::Photo, &profile())
            .unwrap();

        assert_eq!(result.data, vec![1, 2]);
        assert_eq!(result.compression_ratio, 0.5);
        assert_eq!(result.quality_used, Some(75));
        assert_eq!(compressor.get_call_count(), 1);
    }

    #[test]
    fn test_mock_scripted_failures() {
        let compressor = MockCompressor::new().with_failures(1);
        let probe = compressor.clone();

        assert!(compressor.compress(&[1, 2], ImageRole::Logo, &profile()).is_err());
        assert!(compressor.compress(&[1, 2], ImageRole::Logo, &profile()).is_ok());
        assert_eq!(probe.get_call_count(), 2);
        assert_eq!(probe.get_qualities_seen(), vec![85, 85]);
    }

    #[test]
    fn test_mock_always_fails() {
        let compressor = MockCompressor::new().with_failure(true);
        let err = compressor
            .compress(&[1, 2], ImageRole::Text, &profile())
            .unwrap_err();
        assert_eq!(err, CompressionError::Encode("Mock failure".to_string()));
    }
}
