//! Feedstage Server - Main entry point

use anyhow::Result;
use feedstage_common::config::Config;
use feedstage_common::logging::init_logging;
use feedstage_ingest::db::create_pool;
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var_os("FEEDSTAGE_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let _guard = init_logging(&config.logging)?;

    info!("Starting Feedstage admin server");
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = create_pool(&config.database).await?;
    info!("Database connection pool established");

    let app = feedstage_server::app(db_pool);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // In-flight requests get a short grace period; the full timeout is only an upper bound
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
