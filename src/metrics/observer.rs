//! Session Observer
//!
//! Reporting seam between the forwarding core and whatever displays its
//! status. Every method has a no-op default so implementors only pick the
//! events they care about.

use crate::relay::{Direction, RelaySession, SessionStats};
use std::net::SocketAddr;
use std::sync::Arc;

pub trait SessionObserver: Send + Sync {
    /// An inbound connection was accepted by the listener
    fn connection_accepted(&self, _peer: SocketAddr) {}

    /// An inbound connection was closed because the connection limit was reached
    fn connection_rejected(&self, _peer: SocketAddr) {}

    /// Dialing the remote target failed; the inbound connection has been closed
    fn dial_failed(&self, _peer: SocketAddr, _remote: &str, _error: &anyhow::Error) {}

    /// The session's byte counters stay live until it ends
    fn session_started(&self, _session: &Arc<RelaySession>) {}

    /// One chunk of `bytes` was fully written in `direction`
    fn bytes_transferred(&self, _session: &RelaySession, _direction: Direction, _bytes: u64) {}

    fn session_ended(&self, _stats: &SessionStats) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
