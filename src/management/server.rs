//! Management API Server

use super::{api::ManagementApi, handlers::AppState};
use crate::{config::Config, metrics::Metrics, Result};
use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Management API server
pub struct ManagementServer {
    bind_addr: SocketAddr,
    app_state: AppState,
}

impl ManagementServer {
    pub fn new(bind_addr: SocketAddr, config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        Self {
            bind_addr,
            app_state: AppState::new(config, metrics),
        }
    }

    /// Start the management API server
    pub async fn start(self) -> Result<()> {
        info!("Starting management API server on {}", self.bind_addr);

        let app = ManagementApi::create_router(self.app_state);

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind management API server to {}", self.bind_addr))?;

        info!("Management API server listening on {}", self.bind_addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("Management API server error: {}", e);
            return Err(e.into());
        }

        Ok(())
    }

    pub fn router(&self) -> Router {
        ManagementApi::create_router(self.app_state.clone())
    }
}
