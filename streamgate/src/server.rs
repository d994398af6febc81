//! HTTP server lifecycle

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use streamgate_api::{create_router, AppState};
use streamgate_core::{bootstrap::Services, Config};

pub struct StreamgateServer {
    config: Config,
    services: Services,
}

impl StreamgateServer {
    pub const fn new(config: Config, services: Services) -> Self {
        Self { config, services }
    }

    /// Serve until SIGINT/SIGTERM, then drain in-flight requests for up to
    /// `server.shutdown_timeout_seconds`.
    pub async fn run(mut self) -> Result<()> {
        let http_addr = self.config.http_address();
        let drain_timeout = Duration::from_secs(self.config.server.shutdown_timeout_seconds);

        let state = AppState::new(&self.services, self.config.clone())
            .context("Failed to initialize HTTP state")?;
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(&http_addr)
            .await
            .with_context(|| format!("Failed to bind HTTP address {http_addr}"))?;
        info!("HTTP server listening on {}", http_addr);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let graceful = async move {
            let _ = shutdown_rx.changed().await;
        };

        let mut server = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(graceful)
            .await
        });

        tokio::select! {
            result = &mut server => {
                self.services.shutdown();
                return match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(anyhow::anyhow!("HTTP server error: {e}")),
                    Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {e}")),
                };
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        let _ = shutdown_tx.send(true);

        match tokio::time::timeout(drain_timeout, &mut server).await {
            Ok(Ok(Ok(()))) => info!("HTTP server shut down gracefully"),
            Ok(Ok(Err(e))) => error!("HTTP server error during shutdown: {}", e),
            Ok(Err(e)) => error!("HTTP server task failed: {}", e),
            Err(_) => {
                warn!(
                    "Drain timeout of {}s reached, aborting remaining connections",
                    drain_timeout.as_secs()
                );
                server.abort();
            }
        }

        self.services.shutdown();
        info!("Streamgate stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
