//! Batch optimization for one document job.
//!
//! The coordinator is the single entry point the document pipeline calls. It
//! classifies every asset, deduplicates work through the shared cache, runs
//! compression on the shared worker pool with a bounded retry budget, and
//! returns results in input order once every asset has settled.

use crate::cache::{CacheKey, CompressionCache, ContentHash};
use crate::classifier::classify;
use crate::compressor::{Compressor, ImageCompressor};
use crate::fetcher::AssetFetcher;
use crate::metrics::MetricsRecorder;
use crate::models::{
    BatchStats, Dimensions, ImageAsset, ImageRole, ImageStats, OptimizedImage, Technique,
};
use crate::pool::{AbortHandle, WorkerPool};
use crate::profile::{env_value, OptimizationProfile};
use crate::validation::validate;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Runtime settings for the coordinator and the resources it is built with.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for a single compression attempt.
    pub attempt_timeout: Duration,
    /// Fraction of degraded or omitted assets above which a batch is failed.
    pub failure_threshold: f64,
    pub fetch_attempts: usize,
    pub fetch_retry_interval: Duration,
    pub workers: usize,
    pub cache_capacity: u64,
    pub cache_ttl: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            failure_threshold: 0.5,
            fetch_attempts: 3,
            fetch_retry_interval: Duration::from_millis(200),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            cache_capacity: 1024,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Some(ms) = env_value::<u64>("DOCIMG_ATTEMPT_TIMEOUT_MS")? {
            config.attempt_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = env_value("DOCIMG_FAILURE_THRESHOLD")? {
            config.failure_threshold = v;
        }
        if let Some(v) = env_value("DOCIMG_FETCH_ATTEMPTS")? {
            config.fetch_attempts = v;
        }
        if let Some(ms) = env_value::<u64>("DOCIMG_FETCH_RETRY_MS")? {
            config.fetch_retry_interval = Duration::from_millis(ms);
        }
        if let Some(v) = env_value("DOCIMG_WORKERS")? {
            config.workers = v;
        }
        if let Some(v) = env_value("DOCIMG_CACHE_CAPACITY")? {
            config.cache_capacity = v;
        }
        if let Some(secs) = env_value::<u64>("DOCIMG_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(Error::Config(format!(
                "failure threshold must lie within [0, 1] (got {})",
                self.failure_threshold
            )));
        }
        if self.attempt_timeout.is_zero() {
            return Err(Error::Config("attempt timeout must be positive".to_string()));
        }
        if self.fetch_attempts == 0 || self.workers == 0 || self.cache_capacity == 0 {
            return Err(Error::Config(
                "fetch attempts, workers and cache capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the document pipeline holds for one job while it runs.
pub struct BatchJob {
    pub id: Uuid,
    pub assets: Vec<ImageAsset>,
    pub profile: Arc<OptimizationProfile>,
    pub started_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new(assets: Vec<ImageAsset>, profile: Arc<OptimizationProfile>) -> Self {
        Self {
            id: Uuid::new_v4(),
            assets,
            profile,
            started_at: Utc::now(),
        }
    }
}

/// An image to fetch and optimize as part of a document.
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub identifier: String,
    pub role_hint: Option<ImageRole>,
}

impl AssetRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            role_hint: None,
        }
    }

    pub fn with_role(mut self, role: ImageRole) -> Self {
        self.role_hint = Some(role);
        self
    }
}

/// An asset dropped from the batch because its bytes could not be fetched.
#[derive(Debug, Clone, Serialize)]
pub struct OmittedAsset {
    pub identifier: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Identifier of each entry in `results`, in the same order.
    pub identifiers: Vec<String>,
    pub results: Vec<OptimizedImage>,
    pub omitted: Vec<OmittedAsset>,
    pub stats: BatchStats,
}

#[derive(Debug)]
pub enum BatchOutcome {
    Completed(BatchReport),
    /// Too many assets were degraded or omitted; results are still attached
    /// so the caller can decide whether to assemble the document anyway.
    Failed(BatchReport),
    /// The job was aborted externally. Already-admitted work finished, but
    /// no result set is returned.
    Aborted { job_id: Uuid, completed: usize },
}

impl BatchOutcome {
    pub fn report(&self) -> Option<&BatchReport> {
        match self {
            BatchOutcome::Completed(report) | BatchOutcome::Failed(report) => Some(report),
            BatchOutcome::Aborted { .. } => None,
        }
    }

    pub fn into_report(self) -> Option<BatchReport> {
        match self {
            BatchOutcome::Completed(report) | BatchOutcome::Failed(report) => Some(report),
            BatchOutcome::Aborted { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BatchOutcome::Completed(_))
    }
}

/// Injectable service bundle used to construct [`BatchCoordinator`].
///
/// The cache and pool are meant to be created once by the process and shared
/// by every coordinator.
pub struct CoordinatorServices {
    pub compressor: Arc<dyn Compressor>,
    pub cache: CompressionCache,
    pub pool: WorkerPool,
    pub metrics: MetricsRecorder,
}

pub struct BatchCoordinator {
    compressor: Arc<dyn Compressor>,
    cache: CompressionCache,
    pool: WorkerPool,
    metrics: MetricsRecorder,
    config: CoordinatorConfig,
}

/// Why an asset's compute step produced no image.
#[derive(Debug)]
enum AssetFailure {
    Aborted,
    Exhausted { attempts: u32, reason: String },
}

enum AssetOutcome {
    Done {
        image: OptimizedImage,
        stats: ImageStats,
    },
    Aborted,
}

/// Cache signatures of the job profile, one per role.
struct RoleSignatures {
    photo: ContentHash,
    logo: ContentHash,
    graphics: ContentHash,
    text: ContentHash,
}

impl RoleSignatures {
    fn for_profile(profile: &OptimizationProfile) -> Result<Self> {
        Ok(Self {
            photo: profile.signature(ImageRole::Photo)?,
            logo: profile.signature(ImageRole::Logo)?,
            graphics: profile.signature(ImageRole::Graphics)?,
            text: profile.signature(ImageRole::Text)?,
        })
    }

    fn get(&self, role: ImageRole) -> ContentHash {
        match role {
            ImageRole::Photo => self.photo,
            ImageRole::Logo => self.logo,
            ImageRole::Graphics => self.graphics,
            ImageRole::Text => self.text,
        }
    }
}

fn probe_dimensions(data: &[u8]) -> Option<Dimensions> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
        .map(|(width, height)| Dimensions::new(width, height))
}

/// Assert that every re-encoded result of a batch was produced the same way.
///
/// Results must share one technique, and their quality offsets from their
/// role's default may differ by at most the profile's tolerance.
pub fn check_consistency(
    results: &[OptimizedImage],
    stats: &[ImageStats],
    profile: &OptimizationProfile,
) -> Result<()> {
    let optimized: Vec<(&OptimizedImage, ImageRole)> = results
        .iter()
        .zip(stats.iter().map(|s| s.role))
        .filter(|(image, _)| !image.degraded && image.technique != Technique::Passthrough)
        .collect();

    if let Some((first, _)) = optimized.first() {
        if let Some((other, _)) = optimized
            .iter()
            .find(|(image, _)| image.technique != first.technique)
        {
            return Err(Error::Consistency(format!(
                "mixed techniques in one batch: {:?} and {:?}",
                first.technique, other.technique
            )));
        }
    }

    let offsets: Vec<i32> = optimized
        .iter()
        .filter_map(|(image, role)| {
            image
                .quality_used
                .map(|q| profile.quality(*role).default as i32 - q as i32)
        })
        .collect();
    if let (Some(lo), Some(hi)) = (offsets.iter().min(), offsets.iter().max()) {
        let spread = hi - lo;
        if spread > profile.quality_tolerance() as i32 {
            return Err(Error::Consistency(format!(
                "quality offsets spread by {} (tolerance {})",
                spread,
                profile.quality_tolerance()
            )));
        }
    }

    Ok(())
}

impl BatchCoordinator {
    /// Build a coordinator from concrete service dependencies.
    pub fn with_services(services: CoordinatorServices, config: CoordinatorConfig) -> Self {
        Self {
            compressor: services.compressor,
            cache: services.cache,
            pool: services.pool,
            metrics: services.metrics,
            config,
        }
    }

    /// Build a coordinator with the `image`-backed compressor and fresh
    /// cache, pool and metrics sized from `config`.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing coordinator (workers: {}, cache: {} entries, ttl: {:?})",
            config.workers, config.cache_capacity, config.cache_ttl
        );

        let services = CoordinatorServices {
            compressor: Arc::new(ImageCompressor::new()),
            cache: CompressionCache::with_ttl(config.cache_capacity, config.cache_ttl),
            pool: WorkerPool::new(config.workers),
            metrics: MetricsRecorder::new(),
        };
        Ok(Self::with_services(services, config))
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn cache(&self) -> &CompressionCache {
        &self.cache
    }

    /// Optimize every asset of one document under a single profile.
    ///
    /// Results are one-to-one with `assets`, in input order.
    pub async fn optimize_batch(
        &self,
        assets: Vec<ImageAsset>,
        profile: Arc<OptimizationProfile>,
        abort: &AbortHandle,
    ) -> Result<BatchOutcome> {
        self.run_job(BatchJob::new(assets, profile), Vec::new(), abort)
            .await
    }

    /// Fetch each unique asset once, drop the ones that cannot be fetched,
    /// then optimize the rest as one batch.
    #[instrument(skip_all, fields(requests = requests.len()))]
    pub async fn optimize_document(
        &self,
        requests: Vec<AssetRequest>,
        fetcher: &dyn AssetFetcher,
        profile: Arc<OptimizationProfile>,
        abort: &AbortHandle,
    ) -> Result<BatchOutcome> {
        if abort.is_aborted() {
            self.metrics.record_batch_aborted();
            return Ok(BatchOutcome::Aborted {
                job_id: Uuid::new_v4(),
                completed: 0,
            });
        }

        let mut seen = HashSet::new();
        let unique: Vec<&str> = requests
            .iter()
            .map(|r| r.identifier.as_str())
            .filter(|id| seen.insert(*id))
            .collect();
        let fetched = join_all(unique.iter().map(|id| self.fetch_with_retry(fetcher, id))).await;
        let sources: HashMap<&str, Result<Vec<u8>>> = unique.into_iter().zip(fetched).collect();

        let mut assets = Vec::with_capacity(requests.len());
        let mut omitted = Vec::new();
        for request in &requests {
            match sources.get(request.identifier.as_str()) {
                Some(Ok(data)) => assets.push(ImageAsset {
                    identifier: request.identifier.clone(),
                    data: data.clone(),
                    role_hint: request.role_hint,
                    dimensions: None,
                }),
                Some(Err(e)) => {
                    warn!("Omitting asset {}: {}", request.identifier, e);
                    omitted.push(OmittedAsset {
                        identifier: request.identifier.clone(),
                        reason: e.to_string(),
                    });
                }
                None => omitted.push(OmittedAsset {
                    identifier: request.identifier.clone(),
                    reason: "asset was never fetched".to_string(),
                }),
            }
        }

        self.run_job(BatchJob::new(assets, profile), omitted, abort)
            .await
    }

    async fn fetch_with_retry(&self, fetcher: &dyn AssetFetcher, identifier: &str) -> Result<Vec<u8>> {
        let retry_strategy = FixedInterval::new(self.config.fetch_retry_interval)
            .take(self.config.fetch_attempts.saturating_sub(1));

        Retry::spawn(retry_strategy, || async move {
            fetcher.fetch(identifier).await.map_err(|e| {
                debug!("Fetch attempt for {} failed: {}", identifier, e);
                e
            })
        })
        .await
    }

    #[instrument(skip_all, fields(job_id = %job.id, assets = job.assets.len()))]
    async fn run_job(
        &self,
        job: BatchJob,
        omitted: Vec<OmittedAsset>,
        abort: &AbortHandle,
    ) -> Result<BatchOutcome> {
        let signatures = RoleSignatures::for_profile(&job.profile)?;
        let BatchJob {
            id,
            assets,
            profile,
            started_at,
        } = job;
        let started = Instant::now();
        let identifiers: Vec<String> = assets.iter().map(|a| a.identifier.clone()).collect();

        info!("Optimizing {} assets", assets.len());

        let outcomes = join_all(
            assets
                .into_iter()
                .map(|asset| self.process_asset(asset, &profile, &signatures, abort)),
        )
        .await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut image_stats = Vec::with_capacity(outcomes.len());
        let mut aborted = abort.is_aborted();
        for outcome in outcomes {
            match outcome {
                AssetOutcome::Done { image, stats } => {
                    self.metrics.record_image(&stats);
                    results.push(image);
                    image_stats.push(stats);
                }
                AssetOutcome::Aborted => aborted = true,
            }
        }

        if aborted {
            warn!(
                "Job aborted after {} of {} assets completed",
                results.len(),
                identifiers.len()
            );
            self.metrics.record_batch_aborted();
            return Ok(BatchOutcome::Aborted {
                job_id: id,
                completed: results.len(),
            });
        }

        check_consistency(&results, &image_stats, &profile)?;

        let mut stats = BatchStats::from_results(&results, &image_stats);
        stats.omitted_count = omitted.len();
        stats.duration = started.elapsed();

        let report = BatchReport {
            job_id: id,
            started_at,
            identifiers,
            results,
            omitted,
            stats,
        };

        if report.stats.failure_fraction() > self.config.failure_threshold {
            error!(
                "Batch failed: {} degraded and {} omitted of {} assets",
                report.stats.degraded_count,
                report.stats.omitted_count,
                report.stats.total_assets + report.stats.omitted_count
            );
            self.metrics.record_batch_failed(&report.stats);
            return Ok(BatchOutcome::Failed(report));
        }

        info!(
            "Batch complete: {} -> {} bytes (ratio {:.3}), {} ok, {} degraded, {} cache hits",
            report.stats.total_original_size,
            report.stats.total_optimized_size,
            report.stats.overall_compression_ratio,
            report.stats.success_count,
            report.stats.degraded_count,
            report.stats.cache_hits
        );
        self.metrics.record_batch(&report.stats);
        Ok(BatchOutcome::Completed(report))
    }

    async fn process_asset(
        &self,
        asset: ImageAsset,
        profile: &Arc<OptimizationProfile>,
        signatures: &RoleSignatures,
        abort: &AbortHandle,
    ) -> AssetOutcome {
        let started = Instant::now();
        let role = classify(&asset);
        let key = CacheKey::new(&asset.data, signatures.get(role));
        let data = Arc::new(asset.data);
        let attempts = AtomicU32::new(0);

        let lookup = loop {
            let result = self
                .cache
                .get_or_compute(key, || {
                    self.compress_with_retries(Arc::clone(&data), role, profile, abort, &attempts)
                })
                .await;
            match result {
                // Another job's abort cancelled a computation we were waiting on.
                Err(failure)
                    if matches!(*failure, AssetFailure::Aborted) && !abort.is_aborted() =>
                {
                    continue
                }
                other => break other,
            }
        };

        let (image, cache_hit) = match lookup {
            Ok(found) => (OptimizedImage::clone(&found.image), found.hit),
            Err(failure) => match failure.as_ref() {
                AssetFailure::Aborted => return AssetOutcome::Aborted,
                AssetFailure::Exhausted { attempts, reason } => {
                    warn!(
                        "Degrading {} after {} attempts: {}",
                        asset.identifier, attempts, reason
                    );
                    let dimensions = asset.dimensions.or_else(|| probe_dimensions(&data));
                    let original = Arc::try_unwrap(data).unwrap_or_else(|shared| shared.to_vec());
                    (
                        OptimizedImage::degraded(original, dimensions, started.elapsed()),
                        false,
                    )
                }
            },
        };

        let stats = ImageStats {
            role,
            original_size: image.original_size,
            optimized_size: image.optimized_size,
            processing_time: started.elapsed(),
            attempts: attempts.load(Ordering::Relaxed),
            cache_hit,
            degraded: image.degraded,
        };
        debug!(
            identifier = %asset.identifier,
            %role,
            cache_hit,
            ratio = image.compression_ratio,
            "Asset settled"
        );

        AssetOutcome::Done { image, stats }
    }

    /// Bounded retry loop: each failed or rejected attempt retries one
    /// quality step lower, up to the profile's retry budget.
    async fn compress_with_retries(
        &self,
        data: Arc<Vec<u8>>,
        role: ImageRole,
        profile: &Arc<OptimizationProfile>,
        abort: &AbortHandle,
        attempts: &AtomicU32,
    ) -> std::result::Result<OptimizedImage, AssetFailure> {
        let mut last_error = String::new();

        for attempt in 0..=profile.max_retries() {
            attempts.fetch_add(1, Ordering::Relaxed);
            let quality = profile.quality_for_attempt(role, attempt);
            let compressor = Arc::clone(&self.compressor);
            let job_profile = Arc::clone(profile);
            let input = Arc::clone(&data);

            let outcome = self
                .pool
                .run(abort, self.config.attempt_timeout, move || {
                    compressor.compress_at(&input, role, &job_profile, quality)
                })
                .await;
            let Some(outcome) = outcome else {
                return Err(AssetFailure::Aborted);
            };

            match outcome.map_err(Error::from).and_then(|image| {
                validate(&image, profile, role)?;
                Ok(image)
            }) {
                Ok(image) => return Ok(image),
                Err(e) => {
                    warn!(
                        "[{}] Attempt {}/{} at quality {} failed: {}",
                        role,
                        attempt + 1,
                        profile.max_retries() + 1,
                        quality,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(AssetFailure::Exhausted {
            attempts: attempts.load(Ordering::Relaxed),
            reason: last_error,
        })
    }
}
