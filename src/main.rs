//! Driver-side trip lifecycle coordinator.
//!
//! Runs the driver session against the realtime server and exposes the
//! control API the driver UI talks to.

use clap::Parser;
use sparrow_driver::{
    config::{ConfigLoader, ConfigOverrides},
    handlers::router,
    state::AppState,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sparrow-driver")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "SPARROW_DRIVER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the control API listen address (e.g. 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Override the realtime server url
    #[arg(long, env = "SPARROW_REALTIME_URL")]
    server_url: Option<String>,

    /// Override the authenticated driver id
    #[arg(long, env = "SPARROW_DRIVER_ID")]
    driver_id: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Starting sparrow-driver v{}", env!("CARGO_PKG_VERSION"));

    let loader = ConfigLoader::new(
        args.config.as_ref(),
        ConfigOverrides {
            listen: args.listen,
            realtime_url: args.server_url,
            driver_id: args.driver_id,
        },
    );
    let config = loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    let (state, runtime) = AppState::new(&config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let session_task = tokio::spawn(runtime.run(shutdown_rx));

    let listener = TcpListener::bind(config.server.listen).await?;
    tracing::info!("Control API listening on {}", config.server.listen);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    session_task.await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sparrow_driver=debug,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
        Err(err) => {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    }
}
