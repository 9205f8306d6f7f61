//! HTTP server implementation.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::service::CpiService;

use super::routes::routes;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/cpi.socket";

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl std::fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: ListenAddr,
}

impl Default for ServerConfig {
    #[cfg(unix)]
    fn default() -> Self {
        Self {
            listen: ListenAddr::Unix(PathBuf::from(DEFAULT_SOCKET_PATH)),
        }
    }

    #[cfg(not(unix))]
    fn default() -> Self {
        Self {
            listen: ListenAddr::Tcp(SocketAddr::from(([127, 0, 0, 1], 50051))),
        }
    }
}

/// Serve the CPI routes until SIGINT or SIGTERM, then cancel any plugin
/// still running.
pub async fn serve(config: ServerConfig, service: Arc<CpiService>) -> anyhow::Result<()> {
    let app = routes(service.clone());

    match &config.listen {
        ListenAddr::Tcp(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            info!("Starting cpi-bridge server on tcp://{}", listener.local_addr()?);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(service.clone()))
                .await?;
        }
        #[cfg(unix)]
        ListenAddr::Unix(path) => {
            remove_stale_socket(path)?;
            let listener = tokio::net::UnixListener::bind(path)
                .with_context(|| format!("failed to bind {}", path.display()))?;
            info!("Starting cpi-bridge server on unix://{}", path.display());

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(service.clone()))
                .await?;

            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(error = %e, path = %path.display(), "Failed to remove socket");
            }
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed stale socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("failed to remove stale socket {}", path.display()))
        }
    }
}

/// Wait for SIGINT or SIGTERM, then cancel in-flight plugin calls so
/// connections drain promptly.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed, which only happens when the
/// tokio runtime is misconfigured at startup.
async fn shutdown_signal(service: Arc<CpiService>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    service.shutdown();
}
