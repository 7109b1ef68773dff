//! API Server
//!
//! Binds the REST router and serves it until shutdown is requested.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;
use crate::error::{ErrorCode, RodentError, Result};
use crate::zfs::dataset::DatasetManager;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Limit for every request except transfers
    pub request_timeout: Duration,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8042)),
            request_timeout: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

pub struct ApiServer {
    config: ApiServerConfig,
    manager: Arc<DatasetManager>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, manager: Arc<DatasetManager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            manager,
            shutdown_tx,
        }
    }

    /// Serve until [`ApiServer::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.rest_addr;
        let app = RestRouter::new(self.manager.clone(), self.config.request_timeout).build();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| RodentError::from_error(&e, ErrorCode::ServerBind))?;

        info!("REST API listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| RodentError::from_error(&e, ErrorCode::ServerShutdown))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandExecutor;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 8042);
        assert_eq!(config.request_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let manager = Arc::new(DatasetManager::new(Arc::new(CommandExecutor::default())));
        let server = Arc::new(ApiServer::new(
            ApiServerConfig {
                rest_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                ..Default::default()
            },
            manager,
        ));

        let running = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let manager = Arc::new(DatasetManager::new(Arc::new(CommandExecutor::default())));
        let server = ApiServer::new(
            ApiServerConfig {
                rest_addr: taken.local_addr().unwrap(),
                ..Default::default()
            },
            manager,
        );

        let err = server.run().await.unwrap_err();
        assert!(err.has_code(ErrorCode::ServerBind));
    }
}
