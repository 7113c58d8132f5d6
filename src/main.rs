//! Process bootstrap: CLI, logging, configuration, wiring, shutdown.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use filmsync::config::Config;
use filmsync::pipeline::SyncPipeline;
use filmsync::retry::retry_forever;
use filmsync::sink::ElasticSink;
use filmsync::source::PostgresSource;
use filmsync::state::{JsonFileStorage, State};

#[derive(Debug, Parser)]
#[command(name = "filmsync", about = "Incremental Postgres to Elasticsearch sync")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "filmsync.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let schema = config.elasticsearch.load_schema()?;
    let backoff = config.backoff.to_backoff();

    let state = State::load(JsonFileStorage::new(&config.etl.state_path))
        .context("loading checkpoint state")?;

    let sink = retry_forever(&backoff, "elasticsearch connect", || {
        ElasticSink::connect(&config.elasticsearch)
    })
    .await
    .context("connecting to elasticsearch")?;
    retry_forever(&backoff, "index setup", || sink.ensure_index(&schema))
        .await
        .context("ensuring target index")?;

    let source = retry_forever(&backoff, "postgres connect", || {
        PostgresSource::connect(&config.postgres)
    })
    .await
    .context("connecting to postgres")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down after the current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut pipeline = SyncPipeline::new(&config.etl, backoff, source, sink, state);
    pipeline.run(shutdown_rx).await?;

    Ok(())
}
