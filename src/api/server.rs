//! API Server
//!
//! Serves probes, metrics, class diagnostics and the admission webhook
//! on one address.

use super::rest::RestRouter;
use crate::classes::ClassRegistry;
use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

// =============================================================================
// API Server
// =============================================================================

/// HTTP server for the operator
pub struct ApiServer {
    addr: SocketAddr,
    registry: Arc<ClassRegistry>,
    metrics: Arc<Metrics>,
    config: ResolverConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(
        addr: SocketAddr,
        registry: Arc<ClassRegistry>,
        metrics: Arc<Metrics>,
        config: ResolverConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            addr,
            registry,
            metrics,
            config,
            shutdown_tx,
        }
    }

    /// Run until `shutdown` is called
    pub async fn run(&self) -> Result<()> {
        let app = RestRouter::new(
            self.registry.clone(),
            self.metrics.clone(),
            self.config.clone(),
        )
        .build();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind API server: {}", e)))?;
        info!(addr = %self.addr, "API server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("API server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
