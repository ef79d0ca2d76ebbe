use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tuneforge_api::{background, create_router, push, AppState};
use tuneforge_config::load_config;

/// Tuneforge API Server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server port (overrides SERVER_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tuneforge API Server");

    let mut config = load_config()?;
    if let Some(port) = args.port {
        config.server_port = port;
    }

    let state = Arc::new(AppState::new(config.clone()).await?);

    // Background workers: the polling reconciliation loop and the push
    // ingestion consumer run concurrently against the same store.
    background::start_reconciliation_task(state.clone());
    push::start_push_consumer(state.clone());

    let app = create_router((*state).clone());

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    info!("Starting HTTP server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
