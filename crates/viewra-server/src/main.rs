//! # Viewra Server
//!
//! Main server binary for the Viewra playback stack: loads configuration,
//! opens the session store, recovers persisted sessions, starts the
//! janitor, and serves the HTTP API until shutdown.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use viewra_api::{ApiService, AppState};
use viewra_config::ConfigService;
use viewra_core::{PlaybackError, Result};
use viewra_database::DatabaseService;
use viewra_transcoder::TranscoderService;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "viewra-server", about = "Viewra playback server")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "playback.toml", env = "VIEWRA_CONFIG")]
    config: String,

    /// Override the bind port from the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

/// Main playback server
struct PlaybackServer {
    config: Arc<viewra_core::PlaybackConfig>,
    transcoder: TranscoderService,
    api: ApiService,
}

impl PlaybackServer {
    /// Initialise every service from configuration
    async fn new(args: &Args) -> Result<Self> {
        info!("Initializing playback server");

        let config_service = ConfigService::new(&args.config)?;
        let mut config = config_service.get_config().clone();
        if let Some(port) = args.port {
            config.server.port = port;
        }
        let config = Arc::new(config);

        tokio::fs::create_dir_all(&config.transcoding.transcoding_root).await?;

        let database = DatabaseService::new(&config.transcoding.data_dir).await?;
        let transcoder = TranscoderService::new(config.clone(), database).await?;
        let api = ApiService::new(AppState::new(config.clone(), transcoder.clone()));

        Ok(Self {
            config,
            transcoder,
            api,
        })
    }

    /// Serve until a shutdown signal arrives
    async fn run(&self) -> Result<()> {
        let janitor = self.transcoder.spawn_janitor();

        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| PlaybackError::config(format!("invalid bind address: {e}")))?;
        info!("Server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| PlaybackError::internal(format!("failed to bind {addr}: {e}")))?;

        axum::serve(listener, self.api.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| PlaybackError::internal(format!("server error: {e}")))?;

        info!("Shutting down: stopping active sessions");
        self.transcoder.shutdown().await;
        janitor.abort();
        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Viewra playback server");

    match PlaybackServer::new(&args).await {
        Ok(server) => {
            if let Err(e) = server.run().await {
                error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Failed to initialize server: {}", e);
            std::process::exit(1);
        }
    }
}
