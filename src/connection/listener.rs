//! TCP Forwarding Listener
//!
//! Accept loop of the proxy. Each accepted connection is paired with a new
//! remote connection and relayed on its own task, so the loop never waits on
//! per-connection work.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::acceptor::{is_fatal_accept_error, Acceptor};
use super::connector::RemoteConnector;
use crate::config::Config;
use crate::metrics::{NoopObserver, SessionObserver};
use crate::relay::RelayEngine;
use crate::resource::{ConnectionLimiter, ConnectionSlot};
use crate::Result;

/// Pause after a transient accept error so descriptor exhaustion does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Transparent TCP forwarding proxy for one listen address and one remote target
pub struct TcpProxy {
    config: Arc<Config>,
    connector: Arc<RemoteConnector>,
    engine: Arc<RelayEngine>,
    limiter: Option<Arc<ConnectionLimiter>>,
    observer: Arc<dyn SessionObserver>,
    active_connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TcpProxy {
    /// Create a proxy for `listen_addr` -> `remote_addr`. Addresses are not
    /// validated here; bind and dial report problems.
    pub fn new(listen_addr: impl Into<String>, remote_addr: impl Into<String>) -> Self {
        Self::from_config(Arc::new(Config::for_addresses(listen_addr, remote_addr)))
    }

    pub fn from_config(config: Arc<Config>) -> Self {
        Self::build(config, Arc::new(NoopObserver))
    }

    /// Report accepts, dial failures, sessions and transfers to `observer`
    pub fn with_observer(self, observer: Arc<dyn SessionObserver>) -> Self {
        Self::build(self.config, observer)
    }

    fn build(config: Arc<Config>, observer: Arc<dyn SessionObserver>) -> Self {
        let connector = Arc::new(RemoteConnector::from_config(&config, Arc::clone(&observer)));
        let engine = Arc::new(RelayEngine::from_config(&config, Arc::clone(&observer)));
        let limiter = config
            .server
            .max_connections
            .map(|max| Arc::new(ConnectionLimiter::new(max)));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            connector,
            engine,
            limiter,
            observer,
            active_connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Bind the listen address and serve until shutdown or a fatal listener error
    pub async fn start(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listen_addr = &self.config.server.listen_addr;
        info!("Binding TCP listener to {}", listen_addr);

        let listener = TcpListener::bind(listen_addr.as_str())
            .await
            .with_context(|| format!("Failed to bind listen address {}", listen_addr))?;

        info!("Successfully bound to {}", listen_addr);
        Ok(listener)
    }

    /// Main connection acceptance loop
    pub async fn serve<A: Acceptor>(&self, mut acceptor: A) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let bound = acceptor
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.config.server.listen_addr.clone());

        info!("Forwarding {} -> {}", bound, self.config.server.remote_addr);

        loop {
            tokio::select! {
                accept_result = acceptor.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.dispatch(stream, addr),
                        Err(e) if is_fatal_accept_error(&e) => {
                            error!("Listener on {} failed: {}", bound, e);
                            return Err(e).with_context(|| format!("Listener on {} failed", bound));
                        }
                        Err(e) => {
                            warn!("Error accepting connection: {}", e);
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    /// Hand an accepted connection to its own task
    fn dispatch(&self, stream: TcpStream, addr: SocketAddr) {
        debug!("Accepted connection from {}", addr);
        self.observer.connection_accepted(addr);

        let slot = match &self.limiter {
            Some(limiter) => match limiter.try_acquire() {
                Some(slot) => Some(slot),
                None => {
                    warn!("Connection limit reached, closing connection from {}", addr);
                    self.observer.connection_rejected(addr);
                    return;
                }
            },
            None => None,
        };

        let connector = Arc::clone(&self.connector);
        let engine = Arc::clone(&self.engine);
        let active_connections = Arc::clone(&self.active_connections);
        let shutdown_rx = self.shutdown_tx.subscribe();

        active_connections.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            Self::handle_connection(stream, addr, connector, engine, shutdown_rx, slot).await;
            active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Pair one accepted connection with the remote target and relay it
    #[instrument(skip(stream, connector, engine, shutdown_rx, _slot), fields(addr = %addr))]
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        connector: Arc<RemoteConnector>,
        engine: Arc<RelayEngine>,
        shutdown_rx: broadcast::Receiver<()>,
        _slot: Option<ConnectionSlot>,
    ) {
        let start_time = Instant::now();
        info!("Accepted connection from {} for {}", addr, connector.remote_addr());

        let Some((local, remote)) = connector.pair(stream, addr).await else {
            return;
        };

        match engine.run_session(local, remote, Some(shutdown_rx)).await {
            Ok(stats) => {
                debug!("Connection from {} closed after {:?} ({} bytes)",
                       addr, start_time.elapsed(), stats.total_bytes);
            }
            Err(e) => {
                error!("Error relaying connection from {}: {:#}", addr, e);
            }
        }
    }

    /// Number of accepted connections still being handled
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Stop the accept loop and close every active session
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of TCP proxy");
        if self.shutdown_tx.send(()).is_err() {
            debug!("No listener or session is waiting for shutdown");
        }
    }

    /// Wait for all connections to close, bounded by `server.shutdown_timeout`
    pub async fn wait_for_connections_to_close(&self) -> Result<()> {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!("Waiting for {} active connections to close (timeout: {:?})",
              self.active_connections(), shutdown_timeout);

        while self.active_connections() > 0 && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.active_connections();
        if remaining == 0 {
            info!("All connections closed gracefully in {:?}", start_time.elapsed());
        } else {
            warn!("Shutdown timeout reached after {:?} with {} connections still active",
                  start_time.elapsed(), remaining);
        }

        Ok(())
    }

    /// Gracefully shut the proxy down
    pub async fn shutdown(&self) -> Result<()> {
        self.initiate_shutdown();
        self.wait_for_connections_to_close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_does_not_validate_addresses() {
        let proxy = TcpProxy::new("not an address", "");
        assert_eq!(proxy.config().server.listen_addr, "not an address");
        assert_eq!(proxy.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_returned() {
        let proxy = TcpProxy::new("definitely-not-a-host.invalid:0", "127.0.0.1:1");
        assert!(proxy.start().await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_returned() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let proxy = TcpProxy::new(addr.to_string(), "127.0.0.1:1");
        let err = proxy.start().await.unwrap_err();
        assert!(format!("{:#}", err).contains(&addr.to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let proxy = Arc::new(TcpProxy::new("127.0.0.1:0", "127.0.0.1:1"));
        let listener = proxy.bind().await.unwrap();

        let server = {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move { proxy.serve(listener).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        proxy.shutdown().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), server).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
