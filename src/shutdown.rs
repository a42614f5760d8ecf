//! Graceful Shutdown Handling
//!
//! Waits for SIGTERM, SIGINT or Ctrl+C and drains the proxy once one arrives.

use std::time::Instant;
use tokio::signal;
use tracing::info;

use crate::connection::TcpProxy;
use crate::Result;

/// Shutdown coordinator that manages the graceful shutdown process
#[derive(Debug, Default)]
pub struct ShutdownCoordinator;

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        Ok(())
    }

    /// Stop the proxy's listener, close its sessions and wait for them to drain
    pub async fn shutdown_proxy(&self, proxy: &TcpProxy) -> Result<()> {
        let start_time = Instant::now();
        info!("Shutting down proxy with {} active connections", proxy.active_connections());

        proxy.shutdown().await?;

        info!("Proxy shutdown finished in {:?}", start_time.elapsed());
        Ok(())
    }
}
