use std::sync::Arc;

use replicast_cache::ReplicaCache;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::{build_router, AppState};

/// HTTP front end over a replica cache.
pub struct ReplicastServer {
    config: ServerConfig,
    cache: Arc<ReplicaCache>,
}

impl ReplicastServer {
    pub fn new(config: ServerConfig, cache: Arc<ReplicaCache>) -> Self {
        Self { config, cache }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ReplicaCache> {
        &self.cache
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        let state = AppState {
            cache: self.cache.clone(),
        };
        build_router(state, &self.config)
    }

    /// Binds the configured address and serves until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_with_listener(listener, cancel).await
    }

    /// Serves on an already bound listener until `cancel` fires.
    pub async fn serve_with_listener(
        self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> ServerResult<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "replicast HTTP server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        info!(%addr, "replicast HTTP server stopped");
        Ok(())
    }
}
