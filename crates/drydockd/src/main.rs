//! drydock worker
//!
//! Runs one build job for one event against the local Docker daemon:
//! setup network → walk pipeline → remove services → teardown → (optionally)
//! publish.
//! The event, including its step log, is printed as JSON when the job ends.

use anyhow::{Context, Result};
use clap::Parser;
use drydock_ci::telemetry::init_tracing;
use drydock_ci::{Build, DockerEngine, Event, HttpAnalyzer, RunnerConfig};
use drydock_pipeline::{NodeTypes, Tree};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "drydockd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a drydock build job for one event", long_about = None)]
struct Cli {
    /// Pipeline tree (JSON)
    #[arg(short, long)]
    tree: PathBuf,

    /// Triggering event (JSON)
    #[arg(short, long)]
    event: PathBuf,

    /// Build context directory
    #[arg(short, long, default_value = ".")]
    context: PathBuf,

    /// Only run these step types, e.g. "service,integration" (default: all)
    #[arg(long, default_value = "")]
    flags: NodeTypes,

    /// Push the image after a successful walk
    #[arg(long)]
    publish: bool,

    /// Write the final event here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {:?}", path))
}

async fn run_job(build: &mut Build, flags: NodeTypes, publish: bool) -> drydock_ci::Result<()> {
    build.run_with_network(flags).await?;
    if publish {
        build.publish_image().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let config = RunnerConfig::from_env().context("Invalid runner configuration")?;
    let tree: Tree = read_json_file(&cli.tree)?;
    let event: Event = read_json_file(&cli.event)?;

    let engine = DockerEngine::connect(&config).context("Failed to connect to Docker")?;
    let manager = Arc::new(engine);
    let mut build = Build::load(&cli.context, event, manager, Arc::new(tree));
    if let Some(endpoint) = &config.analyzer_endpoint {
        build = build.with_analyzer(Arc::new(HttpAnalyzer::new(endpoint.clone())?));
    }
    let mut build = build.with_config(config);

    info!(event_id = %build.event().id, flags = %cli.flags, "starting build job");
    let outcome = run_job(&mut build, cli.flags, cli.publish).await;

    match &outcome {
        Ok(()) => info!(
            event_id = %build.event().id,
            pushed = build.is_push_image_success(),
            "build job finished"
        ),
        Err(e) => error!(event_id = %build.event().id, error = %e, "build job failed"),
    }

    let event_json = serde_json::to_string_pretty(&build.into_event())?;
    match &cli.output {
        Some(path) => std::fs::write(path, &event_json)
            .with_context(|| format!("Failed to write to {:?}", path))?,
        None => println!("{}", event_json),
    }

    outcome.context("build job failed")
}
