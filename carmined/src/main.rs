//! Carmine daemon entry point.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use carminedlib::{
    config::{load_config, CarminedConfig},
    error::IndexerError,
    indexer::start_indexer,
};

#[derive(Parser, Debug)]
#[command(name = "carmined", about = "Bitcoin chain indexer and mempool synchronizer")]
struct Args {
    /// Path to the configuration file. Defaults are used when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), IndexerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let config = match args.config {
        Some(path) => load_config(&path)?,
        None => CarminedConfig::default(),
    };

    let serve_task = start_indexer(config).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting..");
            Ok(())
        }
        result = serve_task => result?,
    }
}
