//! Normalizes heterogeneous cloud log streams into a single, semantically
//! classified, token-efficient event schema.
//!
//! Startup is linear, not phased like the teacher's background-model-load
//! split: the embedding model is small enough (a sentence-embedding BERT
//! plus a linear projection) to load synchronously before the pipeline
//! starts, so there's no "model still loading" state for callers to
//! observe.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lumber::cancel::CancelToken;
use lumber::classifier::Classifier;
use lumber::compactor::Compactor;
use lumber::config::{Cli, Config, Mode};
use lumber::connector;
use lumber::embedder::Embedder;
use lumber::engine::Engine;
use lumber::output::{AsyncSink, FileSink, FullPolicy, MultiSink, Sink, StdoutSink, WebhookSink};
use lumber::pipeline::Pipeline;
use lumber::shutdown;
use lumber::taxonomy::Taxonomy;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.into_config().context("invalid configuration")?;

    init_logging(&config.log_level);
    tracing::info!("lumber starting up");

    let embedder = Embedder::load(&config.models_dir).context("failed to load embedding model")?;
    let taxonomy = Taxonomy::build(&embedder).context("failed to embed taxonomy")?;
    let classifier = Classifier::new(config.threshold);
    let compactor = Compactor::default();
    let engine = Arc::new(Engine::new(Box::new(embedder), taxonomy, classifier, compactor, config.verbosity));

    let output = build_output(&config)?;

    let root_cancel = CancelToken::new();
    shutdown::watch(root_cancel.clone(), std::time::Duration::from_secs(config.shutdown_timeout_secs));

    match config.mode {
        Mode::Stream => run_stream(&config, engine, output, root_cancel).await,
        Mode::Query => run_query(&config, engine, output, &root_cancel).await,
    }
}

async fn run_stream(config: &Config, engine: Arc<Engine>, output: Arc<dyn Sink>, cancel: CancelToken) -> Result<()> {
    let connector_name = config
        .connector
        .as_deref()
        .context("--connector is required in stream mode")?;
    let connector = connector::build(connector_name, &config.extra, config.api_key.clone())
        .with_context(|| format!("failed to build connector '{connector_name}'"))?;
    let connector: Arc<dyn connector::Connector> = Arc::from(connector);

    let pipeline = Pipeline::new(connector, engine, output, config.dedup_window_secs, config.dedup_max_buffer);

    let result = pipeline.run_stream(cancel).await;
    pipeline.close().await?;
    result.context("stream pipeline failed")
}

async fn run_query(config: &Config, engine: Arc<Engine>, output: Arc<dyn Sink>, cancel: &CancelToken) -> Result<()> {
    let connector_name = config
        .connector
        .as_deref()
        .context("--connector is required in query mode")?;
    let connector = connector::build(connector_name, &config.extra, config.api_key.clone())
        .with_context(|| format!("failed to build connector '{connector_name}'"))?;
    let connector: Arc<dyn connector::Connector> = Arc::from(connector);

    let from = config.query_from.context("--query-from is required in query mode")?;
    let to = config.query_to.context("--query-to is required in query mode")?;

    let pipeline = Pipeline::new(connector, engine, output, config.dedup_window_secs, config.dedup_max_buffer);
    let result = pipeline.run_query(from, to, config.query_limit, cancel).await;
    pipeline.close().await?;
    result.context("query pipeline failed")
}

/// Wires stdout (direct, always on), plus an optional file sink and an
/// optional webhook sink, each decoupled behind an [`AsyncSink`] so a slow
/// disk or a slow remote endpoint never stalls classification (spec.md
/// §4.11). The webhook sink drops rather than blocks under backpressure —
/// losing a delivery to an external collector is preferable to stalling
/// the whole pipeline on it.
fn build_output(config: &Config) -> Result<Arc<dyn Sink>> {
    let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(StdoutSink::new(config.pretty, config.verbosity))];

    if let Some(path) = &config.file_path {
        let file = FileSink::new(path.clone(), config.verbosity).with_context(|| format!("failed to open log file {}", path.display()))?;
        sinks.push(Box::new(AsyncSink::new(Box::new(file))));
    }

    if let Some(url) = &config.webhook_url {
        let webhook = WebhookSink::new(url.clone(), config.verbosity);
        sinks.push(Box::new(AsyncSink::with_options(
            Box::new(webhook),
            1024,
            FullPolicy::DropOnFull,
            Arc::new(|err| tracing::warn!(error = %err, "webhook sink failed")),
            Arc::new(|_event| tracing::warn!("webhook sink dropped an event under backpressure")),
        )));
    }

    Ok(Arc::new(MultiSink::new(sinks)))
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
