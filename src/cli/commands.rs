//! CLI command definitions for xray.
//!
//! Commands run the demo pipeline into a local run directory, reconcile the
//! offline buffer, ingest run documents, and query stored runs and steps.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rand::RngExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::api::{RunListParams, StepListParams, TraceService};
use crate::config::XRayConfig;
use crate::delivery::{Delivery, DeliveryPolicy, OfflineBuffer, StoreTransport};
use crate::store::DirectoryStore;
use crate::trace::{TraceError, Tracer};

use super::demo::{run_competitor_selection, DemoError};

/// Default directory for the local run store.
const DEFAULT_STORE_DIR: &str = "./xray-runs";

/// Default product title for the demo pipeline.
const DEFAULT_DEMO_TITLE: &str = "iPhone 15 Case - Premium Protection";

/// Record and query traces of multi-step pipelines.
#[derive(Parser)]
#[command(name = "xray")]
#[command(about = "Record and query traces of multi-step, non-deterministic pipelines")]
#[command(version)]
#[command(
    long_about = "xray records what each step of a pipeline rejected, accepted and decided, then answers questions across runs.\n\nExample usage:\n  xray demo --runs 5 --seed 7\n  xray steps --step-type filter --rejection-rate-gt 0.5"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the simulated competitor-selection pipeline and record its traces.
    Demo(DemoArgs),

    /// Resend buffered runs from the offline directory.
    Sync(SyncArgs),

    /// Ingest a run document from a JSON file.
    Ingest(IngestArgs),

    /// List stored runs.
    Runs(RunsArgs),

    /// Query steps across stored runs.
    Steps(StepsArgs),

    /// Show one run with all of its steps.
    Show(ShowArgs),
}

/// Location of the local run directory.
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// Directory holding one JSON document per run.
    #[arg(short = 's', long = "store", env = "XRAY_STORE_DIR", default_value = DEFAULT_STORE_DIR)]
    pub dir: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct DemoArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Number of pipeline runs to record.
    #[arg(short = 'n', long, default_value = "3")]
    pub runs: usize,

    /// Seed for the mock catalog and rejection sampling.
    #[arg(long, env = "XRAY_SEED")]
    pub seed: Option<u64>,

    /// Product title the pipeline searches competitors for.
    #[arg(short = 't', long, default_value = DEFAULT_DEMO_TITLE)]
    pub title: String,

    /// Failure policy when a run cannot be written.
    #[arg(long, env = "XRAY_OFFLINE_MODE", default_value = "buffer")]
    pub policy: DeliveryPolicy,
}

#[derive(clap::Args, Debug)]
pub struct SyncArgs {
    /// API base URL to resend to.
    #[arg(long, env = "XRAY_API_URL")]
    pub api_url: Option<String>,

    /// Offline buffer directory.
    #[arg(long, env = "XRAY_OFFLINE_DIR")]
    pub offline_dir: Option<PathBuf>,

    /// Resend into a local run directory instead of the API.
    #[arg(short = 's', long = "store")]
    pub store_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct IngestArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Path to a run document.
    pub file: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct RunsArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Only runs of this pipeline.
    #[arg(short = 'p', long)]
    pub pipeline: Option<String>,

    /// Only runs with this status (running, completed, failed).
    #[arg(long)]
    pub status: Option<String>,

    #[arg(long, default_value = "100")]
    pub limit: usize,

    #[arg(long, default_value = "0")]
    pub offset: usize,
}

#[derive(clap::Args, Debug)]
pub struct StepsArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Only steps with this type tag (e.g. filter, select).
    #[arg(long)]
    pub step_type: Option<String>,

    /// Case-insensitive part of the step name.
    #[arg(long)]
    pub name: Option<String>,

    /// Only steps whose rejection rate is strictly greater.
    #[arg(long)]
    pub rejection_rate_gt: Option<f64>,

    /// Only steps whose rejection rate is strictly less.
    #[arg(long)]
    pub rejection_rate_lt: Option<f64>,

    #[arg(long, default_value = "100")]
    pub limit: usize,

    #[arg(long, default_value = "0")]
    pub offset: usize,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Identifier of the run.
    pub run_id: String,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and run the selected command.
///
/// For control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Demo(args) => run_demo_command(args).await,
        Commands::Sync(args) => run_sync_command(args).await,
        Commands::Ingest(args) => run_ingest_command(args).await,
        Commands::Runs(args) => run_runs_command(args).await,
        Commands::Steps(args) => run_steps_command(args).await,
        Commands::Show(args) => run_show_command(args).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_store(args: &StoreArgs) -> anyhow::Result<Arc<DirectoryStore>> {
    let store = DirectoryStore::open(&args.dir)
        .await
        .with_context(|| format!("Failed to open run directory {}", args.dir.display()))?;
    Ok(Arc::new(store))
}

async fn open_service(args: &StoreArgs) -> anyhow::Result<TraceService> {
    Ok(TraceService::new(open_store(args).await?))
}

// ============================================================================
// Demo
// ============================================================================

async fn run_demo_command(args: DemoArgs) -> anyhow::Result<()> {
    let config = XRayConfig::from_env()?
        .with_delivery_policy(args.policy)
        .with_seed(args.seed);
    config.validate()?;

    let store = open_store(&args.store).await?;
    let delivery = Delivery::new(
        Arc::new(StoreTransport::new(store.clone())),
        config.delivery_policy,
        OfflineBuffer::new(config.offline_dir.clone()),
    )
    .with_send_timeout(config.send_timeout);

    let tracer = Tracer::new("competitor_selection", Arc::new(delivery))
        .with_sampling(config.sampling_policy())
        .with_seed(config.seed);

    let base_seed = args.seed.unwrap_or_else(|| rand::rng().random::<u64>());
    info!(
        runs = args.runs,
        seed = base_seed,
        store = %args.store.dir.display(),
        "Running competitor-selection demo"
    );

    let mut completed = 0usize;
    let mut failed = 0usize;
    for i in 0..args.runs {
        let seed = base_seed.wrapping_add(i as u64);
        // Every fourth run searches an empty catalog and fails.
        let catalog_size = if i % 4 == 3 { 0 } else { 500 };

        match run_competitor_selection(&tracer, &args.title, catalog_size, seed).await {
            Ok(selection) => {
                completed += 1;
                if selection.bad_match {
                    warn!(
                        run_id = %selection.run_id,
                        selected = %selection.product.title,
                        category = %selection.product.category,
                        "Bad match selected"
                    );
                } else {
                    info!(
                        run_id = %selection.run_id,
                        selected = %selection.product.title,
                        "Selected competitor"
                    );
                }
            }
            Err(TraceError::Pipeline(DemoError::NoCandidates(title))) => {
                failed += 1;
                warn!(title = %title, "Run failed: no candidates");
            }
            Err(TraceError::Delivery(e)) => return Err(e.into()),
        }
    }

    info!(completed, failed, "Demo finished");
    println!(
        "Recorded {} runs ({} completed, {} failed) in {}",
        args.runs,
        completed,
        failed,
        args.store.dir.display()
    );
    println!("Inspect filter steps with:");
    println!(
        "  xray steps --store {} --step-type filter --rejection-rate-gt 0.5",
        args.store.dir.display()
    );
    Ok(())
}

// ============================================================================
// Sync
// ============================================================================

async fn run_sync_command(args: SyncArgs) -> anyhow::Result<()> {
    let mut config = XRayConfig::from_env()?;
    if let Some(url) = args.api_url {
        config = config.with_api_url(url);
    }
    if let Some(dir) = args.offline_dir {
        config = config.with_offline_dir(dir);
    }
    config.validate()?;

    let delivery = match &args.store_dir {
        Some(dir) => {
            let store = open_store(&StoreArgs { dir: dir.clone() }).await?;
            Delivery::new(
                Arc::new(StoreTransport::new(store)),
                config.delivery_policy,
                OfflineBuffer::new(config.offline_dir.clone()),
            )
            .with_send_timeout(config.send_timeout)
        }
        None => Delivery::from_config(&config)?,
    };

    let report = delivery.reconcile().await?;
    print_json(&report)
}

// ============================================================================
// Ingest and queries
// ============================================================================

async fn run_ingest_command(args: IngestArgs) -> anyhow::Result<()> {
    let content = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let document: serde_json::Value = serde_json::from_slice(&content)
        .with_context(|| format!("{} is not valid JSON", args.file.display()))?;

    let service = open_service(&args.store).await?;
    let response = service.ingest(document).await?;
    print_json(&response)
}

async fn run_runs_command(args: RunsArgs) -> anyhow::Result<()> {
    let service = open_service(&args.store).await?;
    let params = RunListParams {
        pipeline: args.pipeline,
        status: args.status,
        limit: Some(args.limit),
        offset: Some(args.offset),
    };
    print_json(&service.list_runs(&params).await?)
}

async fn run_steps_command(args: StepsArgs) -> anyhow::Result<()> {
    let service = open_service(&args.store).await?;
    let params = StepListParams {
        step_type: args.step_type,
        name: args.name,
        rejection_rate_gt: args.rejection_rate_gt,
        rejection_rate_lt: args.rejection_rate_lt,
        limit: Some(args.limit),
        offset: Some(args.offset),
    };
    print_json(&service.list_steps(&params).await?)
}

async fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let service = open_service(&args.store).await?;
    let run = service.get_run(&args.run_id).await?;
    print_json(&*run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RunStore;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_steps_command() {
        let cli = Cli::try_parse_from([
            "xray",
            "steps",
            "--store",
            "/tmp/runs",
            "--step-type",
            "filter",
            "--rejection-rate-gt",
            "0.9",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Steps(args) => {
                assert_eq!(args.step_type.as_deref(), Some("filter"));
                assert_eq!(args.rejection_rate_gt, Some(0.9));
                assert_eq!(args.limit, 100);
                assert_eq!(args.store.dir, PathBuf::from("/tmp/runs"));
            }
            _ => panic!("expected steps command"),
        }
    }

    #[test]
    fn test_demo_policy_parses() {
        let cli = Cli::try_parse_from(["xray", "demo", "--policy", "strict", "-n", "2"])
            .expect("should parse");
        match cli.command {
            Commands::Demo(args) => {
                assert_eq!(args.policy, DeliveryPolicy::Strict);
                assert_eq!(args.runs, 2);
            }
            _ => panic!("expected demo command"),
        }
        assert!(Cli::try_parse_from(["xray", "demo", "--policy", "retry"]).is_err());
    }

    #[tokio::test]
    async fn test_demo_then_query_store() {
        let temp = tempfile::TempDir::new().expect("Failed to create temp dir");
        let dir = temp.path().join("runs");

        let cli = Cli::try_parse_from([
            "xray",
            "demo",
            "--store",
            dir.to_str().expect("utf-8 path"),
            "-n",
            "4",
            "--seed",
            "9",
            "--policy",
            "strict",
        ])
        .expect("should parse");
        run_with_cli(cli).await.expect("demo should run");

        let store = DirectoryStore::open(&dir).await.expect("open");
        assert_eq!(store.len().await.expect("len"), 4);

        let service = TraceService::new(Arc::new(store));
        let failed = service
            .list_runs(&RunListParams {
                status: Some("failed".to_string()),
                ..Default::default()
            })
            .await
            .expect("list");
        assert_eq!(failed.total, 1);
    }
}
