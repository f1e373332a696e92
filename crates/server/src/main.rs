use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod api;
mod config;

use config::{AppState, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "sceneflow")]
#[command(about = "Story-to-storyboard workflow server", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sceneflow.toml", env = "SCENEFLOW_CONFIG")]
    config: PathBuf,

    /// Data directory for definitions, blobs and checkpoints
    #[arg(short, long, default_value = "./data", env = "SCENEFLOW_DATA_DIR")]
    data_dir: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sceneflow=info,sceneflow_core=info,tower_http=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    tracing::info!("Starting sceneflow");
    tracing::info!("Data directory: {}", args.data_dir.display());

    // Load configuration
    let config = ServerConfig::load(&args.config, args.data_dir)?;
    let state = AppState::new(config).await?;

    let jobs = state.jobs.clone();
    let job_store = state.job_store.clone();
    let checkpoint = state.config.checkpoint_path();

    // Start API server
    let addr = format!("{}:{}", args.host, args.port);
    api::serve(&addr, state, shutdown_signal()).await?;

    jobs.shutdown();
    if let Some(path) = checkpoint {
        let saved = job_store.checkpoint(&path).await?;
        tracing::info!("Checkpointed {} jobs to {}", saved, path.display());
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
