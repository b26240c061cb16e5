//! Controller API Server
//!
//! Runs the REST surface of the Controller Service with graceful shutdown.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use super::rest::RestRouter;
use crate::controlplane::service::ControllerService;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST API server for the Controller Service
pub struct ApiServer {
    config: ApiServerConfig,
    service: Arc<ControllerService>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, service: Arc<ControllerService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            service,
            shutdown_tx,
        }
    }

    /// Run the API server until shutdown is triggered
    pub async fn run(&self) -> Result<()> {
        info!("Starting Controller API Server");
        info!("  REST API: {}", self.config.rest_addr);

        let rest_handle = self.spawn_rest_server();

        match rest_handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("REST server task failed: {:?}", e);
                Err(Error::Internal(format!("REST server task failed: {}", e)))
            }
        }
    }

    /// Spawn the REST server
    fn spawn_rest_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let addr = self.config.rest_addr;
        let service = self.service.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move { run_rest_server(addr, service, shutdown_rx).await })
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Run the REST API server
async fn run_rest_server(
    addr: SocketAddr,
    service: Arc<ControllerService>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let app = RestRouter::new(service).build();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
    info!("REST API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::InMemoryOrchestrator;
    use crate::controlplane::service::ControllerConfig;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 8090);
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let backend = Arc::new(InMemoryOrchestrator::default());
        let service = ControllerService::new(backend, ControllerConfig::default()).unwrap();
        let server = Arc::new(ApiServer::new(
            ApiServerConfig {
                rest_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            },
            service,
        ));

        let running = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        // repeat until the spawned listener has subscribed
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                server.shutdown();
                if running.is_finished() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(result.is_ok());
    }
}
