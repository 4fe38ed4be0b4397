use anyhow::{Context, Result};
use clap::Parser;
use docimg_optimizer::coordinator::{AssetRequest, BatchCoordinator, BatchOutcome, CoordinatorConfig};
use docimg_optimizer::fetcher::FileFetcher;
use docimg_optimizer::models::{Dimensions, OptimizedImage};
use docimg_optimizer::pool::AbortHandle;
use docimg_optimizer::profile::{resolve_profile, ProfileConfig, ProfileContext};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "docimg-optimizer")]
#[command(about = "Optimize the images of one generated document as a single batch")]
struct CliArgs {
    /// JSON profile configuration. Defaults to DOCIMG_* environment variables.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable aggressive mode for this document.
    #[arg(long)]
    aggressive: bool,

    #[arg(long, requires = "max_height")]
    max_width: Option<u32>,

    #[arg(long, requires = "max_width")]
    max_height: Option<u32>,

    /// Directory to write optimized images into.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Directory image paths are resolved against.
    #[arg(long, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    #[arg(value_name = "IMAGES", required = true)]
    images: Vec<String>,
}

/// Output file name: the result position, then the source stem with the
/// extension of the encoded format. The position keeps sources with the same
/// file name in different directories apart.
fn output_file_name(index: usize, identifier: &str, image: &OptimizedImage) -> PathBuf {
    let source = Path::new(identifier);
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let name = match (image.format, source.file_name()) {
        (Some(format), _) => format!("{}.{}", stem, format.extension()),
        (None, Some(file_name)) => file_name.to_string_lossy().into_owned(),
        (None, None) => stem,
    };
    PathBuf::from(format!("{:03}-{}", index, name))
}

async fn run(args: CliArgs) -> Result<bool> {
    let config = match &args.config {
        Some(path) => ProfileConfig::from_json_file(path)?,
        None => ProfileConfig::from_env()?,
    };
    let context = ProfileContext {
        aggressive: args.aggressive.then_some(true),
        max_dimensions: args
            .max_width
            .zip(args.max_height)
            .map(|(w, h)| Dimensions::new(w, h)),
    };
    let profile = resolve_profile(&config, &context)?;
    let coordinator = BatchCoordinator::new(CoordinatorConfig::from_env()?)?;
    let fetcher = FileFetcher::new(&args.root);

    let abort = AbortHandle::new();
    {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, aborting batch");
                abort.abort();
            }
        });
    }

    let requests = args.images.iter().map(AssetRequest::new).collect();
    let outcome = coordinator
        .optimize_document(requests, &fetcher, profile, &abort)
        .await?;

    let report = match &outcome {
        BatchOutcome::Aborted { job_id, completed } => {
            error!("Job {} aborted after {} images", job_id, completed);
            return Ok(false);
        }
        BatchOutcome::Completed(report) | BatchOutcome::Failed(report) => report,
    };

    if let Some(dir) = &args.output_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        for (index, (identifier, image)) in
            report.identifiers.iter().zip(&report.results).enumerate()
        {
            let path = dir.join(output_file_name(index, identifier, image));
            tokio::fs::write(&path, &image.data)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
    }

    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(outcome.is_completed())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docimg_optimizer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting docimg-optimizer");

    let args = CliArgs::parse();

    match run(args).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            error!("Batch did not complete");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Optimization failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
