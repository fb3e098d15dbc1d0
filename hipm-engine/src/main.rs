//! hipm-engine - batch hip metrics runner
//!
//! Scans the configured dataset directories, runs every input through the
//! analysis pipeline and writes one JSON record per completed input.
//! Job state is kept in `<data_dir>/jobs.db` so an interrupted run resumes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hipm_common::config::ConfigResolver;
use hipm_common::EventBus;
use hipm_engine::batch::scan_dataset;
use hipm_engine::db;
use hipm_engine::output::write_result;
use hipm_engine::{AnalysisConfig, BatchOrchestrator, JobRegistry, JsonSegmentationProvider, ProviderRegistry};

/// How long shutdown waits for analysis threads still stuck in a provider
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Command-line arguments for hipm-engine
#[derive(Parser, Debug)]
#[command(name = "hipm-engine")]
#[command(about = "Batch hip ultrasound and X-ray metrics")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "HIPM_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding jobs.db and results/
    #[arg(short, long, env = "HIPM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(short, long, env = "HIPM_LOG_LEVEL")]
    log_level: Option<String>,

    /// Extra dataset folders, scanned after the configured ones
    #[arg(long = "dataset")]
    datasets: Vec<PathBuf>,

    /// Re-run inputs that already settled in a previous run
    #[arg(long)]
    force: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Built by hand so shutdown does not wait forever on a provider that hangs
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let result = runtime.block_on(run(args));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(args: Args) -> Result<()> {
    let mut resolver = ConfigResolver::new();
    if let Some(path) = args.config {
        resolver = resolver.with_config_file(path);
    }
    if let Some(dir) = args.data_dir {
        resolver = resolver.with_data_dir(dir);
    }
    if let Some(level) = args.log_level {
        resolver = resolver.with_log_level(level);
    }
    let (toml, config_source) = resolver.resolve_toml()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(resolver.log_level(&toml)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting hipm-engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    config_source.log();

    let mut config = AnalysisConfig::from_toml(&toml)?;
    config.datasets.extend(args.datasets);
    let config = Arc::new(config);
    let data_dir = resolver.data_dir(&toml);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
    info!("Data dir: {}", data_dir.display());

    let pool = db::init_database_pool(&data_dir.join("jobs.db")).await?;

    let mut providers = ProviderRegistry::new();
    providers.register("manual", Arc::new(JsonSegmentationProvider::new(config.modality)));
    let provider = providers.get(&config.provider)?;
    info!(provider = %config.provider, modality = %config.modality.as_str(), "Provider selected");

    let event_bus = EventBus::new(256);
    let registry = Arc::new(JobRegistry::with_events(event_bus.clone()));
    let restored = db::jobs::restore_registry(&pool, &registry).await?;
    if restored > 0 {
        info!(jobs = restored, "Restored jobs from previous run");
    }

    let orchestrator =
        BatchOrchestrator::new(Arc::clone(&registry), provider, Arc::clone(&config))
            .with_events(event_bus.clone());
    let recovered = orchestrator.recover_interrupted().await?;
    if recovered > 0 {
        warn!(jobs = recovered, "Interrupted jobs recovered");
    }

    for dataset in &config.datasets {
        match scan_dataset(dataset, &config) {
            Ok(files) => {
                info!(dataset = %dataset.display(), files = files.len(), "Dataset scanned");
                for file in files {
                    orchestrator.enqueue(&file.to_string_lossy(), args.force).await;
                }
            }
            Err(e) => error!(dataset = %dataset.display(), error = %e, "Dataset skipped"),
        }
    }

    let summary = tokio::select! {
        summary = orchestrator.run_until_idle() => Some(summary),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling jobs");
            registry.cancel_all().await;
            None
        }
    };

    let saved = db::jobs::persist_registry(&pool, &registry).await?;
    info!(jobs = saved, "Job state saved");

    let results_dir = data_dir.join("results");
    std::fs::create_dir_all(&results_dir)?;
    let mut written = 0;
    for job in registry.list(None).await {
        let path = write_result(&results_dir, &job, &config)
            .with_context(|| format!("Failed to write result of {}", job.input_id))?;
        if path.is_some() {
            written += 1;
        }
    }
    info!(records = written, dir = %results_dir.display(), "Results written");

    if let Some(summary) = summary {
        info!(
            completed = summary.completed,
            failed = summary.failed,
            dead = summary.dead,
            "Done"
        );
    }

    Ok(())
}
