use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pulse_config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use pulse_core::rescan::RescanCoordinator;
use pulse_server::{
    infra::startup::{build_state, cors_layer},
    routes,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "pulse-server")]
#[command(about = "Decred Pulse wallet rescan and progress API")]
struct Cli {
    /// Path to a pulse.toml configuration file
    #[arg(long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, env = "PULSE_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config,
        env_file: cli.env_file,
    })
    .load()
    .context("failed to load configuration")?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,tower_http=warn,pulse_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    let state = build_state(&config);
    let coordinator = state.coordinator.clone();

    let app = routes::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config.cors)),
    );

    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(%address, "Decred Pulse API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(coordinator.clone()))
        .await
        .context("server error")?;

    coordinator.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C and cancels rescans and progress sessions so open
/// WebSockets let the server drain.
async fn shutdown_signal(coordinator: RescanCoordinator) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    coordinator.shutdown_token().cancel();
}
