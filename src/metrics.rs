//! Metrics recording for the optimizer
//!
//! Pure accumulation: recording never influences the coordinator's control
//! flow. Observability consumers read [`MetricsSnapshot`]s, either directly or
//! pushed periodically through a [`MetricsExporter`].

use crate::models::{BatchStats, ImageStats};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Number of per-image durations kept for percentile estimates.
const DURATION_WINDOW: usize = 4096;

/// Thread-safe metrics collector; clones share the same counters.
#[derive(Clone)]
pub struct MetricsRecorder {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    batches_completed: AtomicUsize,
    batches_failed: AtomicUsize,
    batches_aborted: AtomicUsize,

    images_processed: AtomicUsize,
    images_degraded: AtomicUsize,
    images_omitted: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    retries: AtomicUsize,

    bytes_original: AtomicU64,
    bytes_optimized: AtomicU64,

    image_duration_ms: Mutex<VecDeque<u64>>,

    start_time: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub batches_aborted: usize,
    pub images_processed: usize,
    pub images_degraded: usize,
    pub images_omitted: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub retries: usize,
    pub bytes_original: u64,
    pub bytes_optimized: u64,
    pub bytes_saved: u64,
    pub image_duration_avg_ms: u64,
    pub image_duration_p95_ms: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                batches_completed: AtomicUsize::new(0),
                batches_failed: AtomicUsize::new(0),
                batches_aborted: AtomicUsize::new(0),
                images_processed: AtomicUsize::new(0),
                images_degraded: AtomicUsize::new(0),
                images_omitted: AtomicUsize::new(0),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                retries: AtomicUsize::new(0),
                bytes_original: AtomicU64::new(0),
                bytes_optimized: AtomicU64::new(0),
                image_duration_ms: Mutex::new(VecDeque::with_capacity(DURATION_WINDOW)),
                start_time: Instant::now(),
            }),
        }
    }

    // Per-image
    pub fn record_image(&self, stats: &ImageStats) {
        let inner = &self.inner;
        inner.images_processed.fetch_add(1, Ordering::Relaxed);
        if stats.degraded {
            inner.images_degraded.fetch_add(1, Ordering::Relaxed);
        }
        if stats.cache_hit {
            inner.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            inner.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        inner
            .retries
            .fetch_add(stats.attempts.saturating_sub(1) as usize, Ordering::Relaxed);
        inner
            .bytes_original
            .fetch_add(stats.original_size as u64, Ordering::Relaxed);
        inner
            .bytes_optimized
            .fetch_add(stats.optimized_size as u64, Ordering::Relaxed);

        let mut durations = inner
            .image_duration_ms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if durations.len() == DURATION_WINDOW {
            durations.pop_front();
        }
        durations.push_back(stats.processing_time.as_millis() as u64);
    }

    // Per-batch
    pub fn record_batch(&self, stats: &BatchStats) {
        self.inner.batches_completed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .images_omitted
            .fetch_add(stats.omitted_count, Ordering::Relaxed);
    }

    pub fn record_batch_failed(&self, stats: &BatchStats) {
        self.inner.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .images_omitted
            .fetch_add(stats.omitted_count, Ordering::Relaxed);
    }

    pub fn record_batch_aborted(&self) {
        self.inner.batches_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        let (avg, p95) = {
            let durations = inner
                .image_duration_ms
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut sorted: Vec<u64> = durations.iter().copied().collect();
            sorted.sort_unstable();
            let avg = if sorted.is_empty() {
                0
            } else {
                sorted.iter().sum::<u64>() / sorted.len() as u64
            };
            (avg, percentile(&sorted, 0.95))
        };

        let cache_hits = inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = inner.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;
        let bytes_original = inner.bytes_original.load(Ordering::Relaxed);
        let bytes_optimized = inner.bytes_optimized.load(Ordering::Relaxed);

        MetricsSnapshot {
            captured_at: Utc::now(),
            uptime_secs: inner.start_time.elapsed().as_secs(),
            batches_completed: inner.batches_completed.load(Ordering::Relaxed),
            batches_failed: inner.batches_failed.load(Ordering::Relaxed),
            batches_aborted: inner.batches_aborted.load(Ordering::Relaxed),
            images_processed: inner.images_processed.load(Ordering::Relaxed),
            images_degraded: inner.images_degraded.load(Ordering::Relaxed),
            images_omitted: inner.images_omitted.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            retries: inner.retries.load(Ordering::Relaxed),
            bytes_original,
            bytes_optimized,
            bytes_saved: bytes_original.saturating_sub(bytes_optimized),
            image_duration_avg_ms: avg,
            image_duration_p95_ms: p95,
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Receives periodic snapshots.
#[async_trait]
pub trait MetricsExporter: Send + Sync {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}

/// Writes snapshots to the tracing log.
pub struct TracingExporter;

#[async_trait]
impl MetricsExporter for TracingExporter {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        tracing::info!(
            batches = snapshot.batches_completed,
            failed = snapshot.batches_failed,
            images = snapshot.images_processed,
            degraded = snapshot.images_degraded,
            cache_hit_rate = snapshot.cache_hit_rate,
            bytes_saved = snapshot.bytes_saved,
            p95_ms = snapshot.image_duration_p95_ms,
            "Optimizer metrics"
        );
        Ok(())
    }
}

/// Push a snapshot to `exporter` every `interval` until the handle is aborted.
pub fn spawn_exporter(
    recorder: MetricsRecorder,
    exporter: Arc<dyn MetricsExporter>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = exporter.export(&recorder.snapshot()).await {
                tracing::warn!("Metrics export failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageRole;

    fn image_stats(cache_hit: bool, degraded: bool, attempts: u32, ms: u64) -> ImageStats {
        ImageStats {
            role: ImageRole::Photo,
            original_size: 1000,
            optimized_size: if degraded { 1000 } else { 400 },
            processing_time: Duration::from_millis(ms),
            attempts,
            cache_hit,
            degraded,
        }
    }

    #[test]
    fn test_record_images() {
        let metrics = MetricsRecorder::new();
        metrics.record_image(&image_stats(false, false, 1, 10));
        metrics.record_image(&image_stats(true, false, 0, 0));
        metrics.record_image(&image_stats(false, true, 3, 30));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.images_processed, 3);
        assert_eq!(snapshot.images_degraded, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.bytes_original, 3000);
        assert_eq!(snapshot.bytes_saved, 1200);
        assert_eq!(snapshot.image_duration_avg_ms, 13);
        assert_eq!(snapshot.image_duration_p95_ms, 30);
    }

    #[test]
    fn test_record_batches() {
        let metrics = MetricsRecorder::new();
        let stats = BatchStats {
            omitted_count: 2,
            ..Default::default()
        };
        metrics.record_batch(&stats);
        metrics.record_batch_failed(&stats);
        metrics.record_batch_aborted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_completed, 1);
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.batches_aborted, 1);
        assert_eq!(snapshot.images_omitted, 4);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = MetricsRecorder::new();
        let clone = metrics.clone();
        clone.record_image(&image_stats(false, false, 1, 1));
        assert_eq!(metrics.snapshot().images_processed, 1);
    }

    #[test]
    fn test_percentile() {
        assert_eq!(percentile(&[], 0.95), 0);
        assert_eq!(percentile(&[5], 0.95), 5);
        let values: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&values, 0.5), 50);
        assert_eq!(percentile(&values, 0.95), 95);
    }

    struct CollectingExporter {
        seen: Mutex<Vec<MetricsSnapshot>>,
    }

    #[async_trait]
    impl MetricsExporter for CollectingExporter {
        async fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
            self.seen.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spawn_exporter_pushes_snapshots() {
        let metrics = MetricsRecorder::new();
        metrics.record_image(&image_stats(false, false, 1, 5));
        let exporter = Arc::new(CollectingExporter {
            seen: Mutex::new(Vec::new()),
        });

        let handle = spawn_exporter(metrics, exporter.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        let seen = exporter.seen.lock().unwrap();
        assert!(seen.len() >= 2);
        assert_eq!(seen[0].images_processed, 1);
    }

    #[tokio::test]
    async fn test_tracing_exporter() {
        let metrics = MetricsRecorder::new();
        assert!(TracingExporter.export(&metrics.snapshot()).await.is_ok());
    }
}
