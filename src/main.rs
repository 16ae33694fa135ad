//! Live HLS Server
//!
//! Serves live streams over HLS. Each configured path gets a muxer session
//! that segments the published stream with ffmpeg and advertises an optional
//! subtitle track in the multivariant playlist.

mod config;
mod config_file;
mod error;
mod http;
mod ingest;
mod metrics;
mod state;
mod supervisor;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hls_live_lib::LiveStream;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::http::create_router;
use crate::state::AppState;
use crate::supervisor::PathSupervisor;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "hls-live-server";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let (config, load_error) = if std::path::Path::new(&config_path).exists() {
        match crate::config_file::ConfigFile::from_file(&config_path)
            .map_err(|e| e.to_string())
            .and_then(|cf| cf.into_server_config().map_err(|e| e.to_string()))
        {
            Ok(config) => (config, None),
            Err(e) => (ServerConfig::default(), Some(e)),
        }
    } else {
        (ServerConfig::default(), None)
    };

    // Initialize logging
    init_logging(&config.log_level, &config.log_format);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            config_path,
            e
        );
    }
    tracing::info!("Configuration loaded: {:?}", config);
    if config.paths.is_empty() {
        tracing::warn!("no paths configured, nothing will be published");
    }

    // Create application state
    let state = Arc::new(AppState::new(config.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engines = Arc::new(config.hls.engine_factory());

    let mut tasks = Vec::new();
    for path in &config.paths {
        let stream = Arc::new(LiveStream::new(path.formats.clone()));

        let ingest = ingest::run_ingest(
            path.name.clone(),
            path.source.clone(),
            stream.clone(),
            shutdown_rx.clone(),
        );
        let name = path.name.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = ingest.await {
                tracing::error!("ingest of path {} failed: {}", name, e);
            }
        }));

        let supervisor = PathSupervisor {
            state: state.clone(),
            config: config.muxer_config(path),
            stream,
            engines: engines.clone(),
            retry_pause: config.hls.retry_pause(),
        };
        tasks.push(tokio::spawn(supervisor.run(shutdown_rx.clone())));
    }

    // Build router
    let app = create_router(state.clone());

    // Start server
    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| ServerError::Config(format!("invalid listen address: {}", e)))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Close every session so storage directories are cleaned up.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("background task failed: {}", e);
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "hls_live_server={level},hls_live_lib={level},tower_http={level}",
            level = level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
