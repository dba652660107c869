//! Server lifecycle management
//!
//! Starts the session reaper and the HTTP server, then waits for a shutdown
//! signal and stops both.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gamecast_api::{create_router, AppState};
use gamecast_core::bootstrap::Services;
use gamecast_core::Config;

pub struct GamecastServer {
    config: Arc<Config>,
    services: Services,
}

impl GamecastServer {
    pub const fn new(config: Arc<Config>, services: Services) -> Self {
        Self { config, services }
    }

    /// Start all components and wait for shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reaper_shutdown = CancellationToken::new();

        let reaper_handle = self
            .services
            .reaper(&self.config)
            .spawn(reaper_shutdown.clone());

        let mut http_handle = self.start_http_server(shutdown_rx).await?;

        info!("All components started successfully");

        tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Signal all components to shut down
        let _ = shutdown_tx.send(true);
        reaper_shutdown.cancel();

        if !http_handle.is_finished() {
            let _ = http_handle.await;
        }
        let _ = reaper_handle.await;

        // Close whatever connections are still open
        let directory = &self.services.directory;
        let open = directory.snapshot();
        for record in &open {
            directory.remove(record.id().as_str());
        }

        info!(sessions = open.len(), "Gamecast relay stopped");
        Ok(())
    }

    /// Start HTTP server with graceful shutdown support
    async fn start_http_server(&self, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let router = create_router(AppState::new(Arc::clone(&self.config), &self.services));

        let listener = tokio::net::TcpListener::bind(http_address.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
