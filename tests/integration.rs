use docimg_optimizer::{
    cache::CompressionCache,
    compressor::MockCompressor,
    coordinator::{
        AssetRequest, BatchCoordinator, BatchOutcome, CoordinatorConfig, CoordinatorServices,
    },
    fetcher::FileFetcher,
    metrics::MetricsRecorder,
    models::{Dimensions, ImageAsset, ImageRole, OutputFormat, Technique},
    pool::{AbortHandle, WorkerPool},
    profile::{resolve_profile, OptimizationProfile, ProfileConfig, ProfileContext, QualityRange},
};
use image::{ImageFormat, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Cursor;
use std::sync::Arc;

fn photo_png(width: u32, height: u32, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let img = RgbImage::from_fn(width, height, |x, y| {
        let shade = ((x / 7 + y / 5) % 200) as u8;
        Rgb([
            shade.wrapping_add(rng.gen_range(0..30)),
            shade / 2 + rng.gen_range(0..20),
            rng.gen(),
        ])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn document_profile() -> Arc<OptimizationProfile> {
    let mut config = ProfileConfig {
        max_dimensions: Dimensions::new(400, 400),
        min_dimensions: Dimensions::new(50, 50),
        ..Default::default()
    };
    config.qualities.photo = QualityRange::new(40, 60, 75);
    resolve_profile(&config, &ProfileContext::default()).unwrap()
}

fn real_coordinator() -> BatchCoordinator {
    BatchCoordinator::new(CoordinatorConfig {
        workers: 2,
        ..Default::default()
    })
    .unwrap()
}

fn decoded_dimensions(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).unwrap();
    (img.width(), img.height())
}

#[tokio::test]
async fn test_photos_share_profile_and_fit_ceiling() {
    let coordinator = real_coordinator();
    let assets = vec![
        ImageAsset::new("hero.png", photo_png(1200, 900, 1)).with_role(ImageRole::Photo),
        ImageAsset::new("detail.png", photo_png(800, 600, 2)).with_role(ImageRole::Photo),
        ImageAsset::new("banner.png", photo_png(2000, 1500, 3)).with_role(ImageRole::Photo),
    ];

    let outcome = coordinator
        .optimize_batch(assets, document_profile(), &AbortHandle::new())
        .await
        .unwrap();
    assert!(outcome.is_completed());
    let report = outcome.into_report().unwrap();

    assert_eq!(report.results.len(), 3);
    for result in &report.results {
        assert!(!result.degraded);
        let (width, height) = decoded_dimensions(&result.data);
        assert!(width.max(height) <= 400, "{}x{} exceeds ceiling", width, height);
        assert_eq!(result.dimensions, Some(Dimensions::new(width, height)));
        let quality = result.quality_used.unwrap();
        assert!((40..=75).contains(&quality));
        assert_eq!(result.format, Some(OutputFormat::Jpeg));
        assert_eq!(result.technique, Technique::Standard);
    }
    assert_eq!(report.results[0].dimensions, Some(Dimensions::new(400, 300)));
    assert!(report.stats.overall_compression_ratio > 0.0);
    assert_eq!(report.stats.success_count, 3);
}

#[tokio::test]
async fn test_small_logo_is_returned_unchanged() {
    let coordinator = real_coordinator();
    let logo = photo_png(40, 40, 4);

    let outcome = coordinator
        .optimize_batch(
            vec![ImageAsset::new("brand-logo.png", logo.clone())],
            document_profile(),
            &AbortHandle::new(),
        )
        .await
        .unwrap();
    let report = outcome.into_report().unwrap();

    let result = &report.results[0];
    assert_eq!(result.data, logo);
    assert_eq!(result.compression_ratio, 0.0);
    assert_eq!(result.dimensions, Some(Dimensions::new(40, 40)));
    assert!(!result.degraded);
}

#[tokio::test]
async fn test_corrupt_image_degrades_while_batch_completes() {
    let coordinator = real_coordinator();
    let corrupt = b"\x89PNG\r\n\x1a\nnot really a png".to_vec();
    let assets = vec![
        ImageAsset::new("one.png", photo_png(600, 400, 5)),
        ImageAsset::new("broken.png", corrupt.clone()),
        ImageAsset::new("two.png", photo_png(500, 500, 6)),
    ];

    let outcome = coordinator
        .optimize_batch(assets, document_profile(), &AbortHandle::new())
        .await
        .unwrap();
    assert!(outcome.is_completed());
    let report = outcome.into_report().unwrap();

    let broken = &report.results[1];
    assert!(broken.degraded);
    assert_eq!(broken.data, corrupt);
    assert_eq!(broken.compression_ratio, 0.0);
    assert_eq!(report.stats.degraded_count, 1);
    assert_eq!(report.stats.success_count, 2);

    let snapshot = coordinator.metrics().snapshot();
    assert_eq!(snapshot.images_degraded, 1);
    // Default budget is two retries after the first attempt.
    assert_eq!(snapshot.retries, 2);
}

#[tokio::test]
async fn test_identical_inputs_produce_identical_outputs() {
    let source = photo_png(900, 700, 7);
    let profile = document_profile();

    let first = real_coordinator()
        .optimize_batch(
            vec![ImageAsset::new("a.png", source.clone())],
            profile.clone(),
            &AbortHandle::new(),
        )
        .await
        .unwrap()
        .into_report()
        .unwrap();
    let second = real_coordinator()
        .optimize_batch(
            vec![ImageAsset::new("b.png", source)],
            profile,
            &AbortHandle::new(),
        )
        .await
        .unwrap()
        .into_report()
        .unwrap();

    assert_eq!(first.results[0].data, second.results[0].data);
    assert_eq!(first.results[0].quality_used, second.results[0].quality_used);
}

#[tokio::test]
async fn test_cache_is_shared_across_batches() {
    let compressor = MockCompressor::new();
    let probe = compressor.clone();
    let cache = CompressionCache::new(16);
    let pool = WorkerPool::new(2);
    let metrics = MetricsRecorder::new();
    let services = || CoordinatorServices {
        compressor: Arc::new(compressor.clone()),
        cache: cache.clone(),
        pool: pool.clone(),
        metrics: metrics.clone(),
    };
    let first = BatchCoordinator::with_services(services(), CoordinatorConfig::default());
    let second = BatchCoordinator::with_services(services(), CoordinatorConfig::default());
    let profile = document_profile();

    let assets = || {
        vec![
            ImageAsset::new("x.jpg", vec![1; 32]),
            ImageAsset::new("y.jpg", vec![2; 32]),
        ]
    };
    first
        .optimize_batch(assets(), profile.clone(), &AbortHandle::new())
        .await
        .unwrap();
    let report = second
        .optimize_batch(assets(), profile, &AbortHandle::new())
        .await
        .unwrap()
        .into_report()
        .unwrap();

    assert_eq!(probe.get_call_count(), 2);
    assert_eq!(report.stats.cache_hits, 2);
    assert_eq!(metrics.snapshot().batches_completed, 2);
}

#[tokio::test]
async fn test_profile_change_misses_cache() {
    let compressor = MockCompressor::new();
    let probe = compressor.clone();
    let coordinator = BatchCoordinator::with_services(
        CoordinatorServices {
            compressor: Arc::new(compressor),
            cache: CompressionCache::new(16),
            pool: WorkerPool::new(2),
            metrics: MetricsRecorder::new(),
        },
        CoordinatorConfig::default(),
    );
    let aggressive = resolve_profile(
        &ProfileConfig::default(),
        &ProfileContext {
            aggressive: Some(true),
            ..Default::default()
        },
    )
    .unwrap();

    for profile in [document_profile(), aggressive] {
        coordinator
            .optimize_batch(
                vec![ImageAsset::new("same.jpg", vec![3; 16])],
                profile,
                &AbortHandle::new(),
            )
            .await
            .unwrap();
    }

    assert_eq!(probe.get_call_count(), 2);
}

#[tokio::test]
async fn test_document_from_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("photo.png"), photo_png(640, 480, 8)).unwrap();
    std::fs::write(dir.path().join("footer-logo.png"), photo_png(30, 30, 9)).unwrap();

    let coordinator = real_coordinator();
    let fetcher = FileFetcher::new(dir.path());
    let requests = vec![
        AssetRequest::new("photo.png"),
        AssetRequest::new("footer-logo.png"),
        AssetRequest::new("../outside.png"),
    ];

    let outcome = coordinator
        .optimize_document(requests, &fetcher, document_profile(), &AbortHandle::new())
        .await
        .unwrap();
    let report = match outcome {
        BatchOutcome::Completed(report) => report,
        other => panic!("unexpected outcome: {:?}", other),
    };

    assert_eq!(report.identifiers, vec!["photo.png", "footer-logo.png"]);
    assert_eq!(report.omitted.len(), 1);
    assert_eq!(report.omitted[0].identifier, "../outside.png");
    assert_eq!(report.results[0].dimensions, Some(Dimensions::new(400, 300)));
    assert_eq!(report.results[1].technique, Technique::Passthrough);

    let json = serde_json::to_value(&report).unwrap();
    assert!(json["results"][0].get("data").is_none());
    assert_eq!(json["stats"]["omitted_count"], 1);
}

/// Gentle gradient with faint grain, so PNG cannot beat the JPEG re-encode.
fn smooth_png(width: u32, height: u32, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 240 / width) as u8 + rng.gen_range(0..8),
            (y * 240 / height) as u8 + rng.gen_range(0..8),
            128 + rng.gen_range(0..8),
        ])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

#[tokio::test]
async fn test_aggressive_wide_range_batch_completes() {
    let mut config = ProfileConfig {
        max_dimensions: Dimensions::new(400, 400),
        min_dimensions: Dimensions::new(50, 50),
        aggressive: true,
        quality_tolerance: 80,
        ..Default::default()
    };
    config.qualities.photo = QualityRange::new(10, 90, 95);
    let profile = resolve_profile(&config, &ProfileContext::default()).unwrap();

    let assets = vec![
        ImageAsset::new("smooth.png", smooth_png(800, 800, 11)).with_role(ImageRole::Photo),
        ImageAsset::new("noisy.png", photo_png(800, 800, 10)).with_role(ImageRole::Photo),
    ];
    let outcome = real_coordinator()
        .optimize_batch(assets, profile, &AbortHandle::new())
        .await
        .unwrap();

    assert!(outcome.is_completed());
    let report = outcome.into_report().unwrap();
    for result in &report.results {
        assert!(!result.degraded);
        assert_eq!(result.technique, Technique::Aggressive);
        assert!((10..=95).contains(&result.quality_used.unwrap()));
    }
}
