//! Remote Connector
//!
//! Dials the fixed remote target for each accepted connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::Config;
use crate::metrics::{NoopObserver, SessionObserver};
use crate::Result;

pub struct RemoteConnector {
    remote_addr: String,
    connect_timeout: Option<Duration>,
    observer: Arc<dyn SessionObserver>,
}

impl RemoteConnector {
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            connect_timeout: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn from_config(config: &Config, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            remote_addr: config.server.remote_addr.clone(),
            connect_timeout: config.server.connect_timeout,
            observer,
        }
    }

    pub fn with_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Open a connection to the remote target
    pub async fn connect(&self) -> Result<TcpStream> {
        debug!("Dialing remote target {}", self.remote_addr);

        let dial = TcpStream::connect(self.remote_addr.as_str());
        let stream = match self.connect_timeout {
            Some(limit) => timeout(limit, dial)
                .await
                .map_err(|_| anyhow!("Connection to {} timed out after {:?}", self.remote_addr, limit))?,
            None => dial.await,
        }
        .with_context(|| format!("Failed to connect to {}", self.remote_addr))?;

        Ok(stream)
    }

    /// Pair an accepted connection with a fresh remote connection.
    ///
    /// On dial failure `local` is closed here and `None` is returned; no session
    /// is created for it.
    pub async fn pair(&self, local: TcpStream, peer: SocketAddr) -> Option<(TcpStream, TcpStream)> {
        match self.connect().await {
            Ok(remote) => Some((local, remote)),
            Err(e) => {
                drop(local);
                warn!(client_addr = %peer, remote_addr = %self.remote_addr,
                      "Remote dial failed, closed client connection: {:#}", e);
                self.observer.dial_failed(peer, &self.remote_addr, &e);
                None
            }
        }
    }
}

/// Check whether `addr` accepts TCP connections within `limit`
pub async fn probe(addr: &str, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(e)) => {
            debug!("Probe of {} failed: {}", addr, e);
            false
        }
        Err(_) => {
            debug!("Probe of {} timed out after {:?}", addr, limit);
            false
        }
    }
}
