//! Connection Acceptor
//!
//! The listener loop accepts through this trait so that transient accept
//! failures can be injected in tests.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

pub trait Acceptor: Send {
    /// Accept the next inbound connection
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;

    /// Address the acceptor is bound to, if known
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Acceptor for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

#[cfg(unix)]
const EBADF: i32 = 9;
#[cfg(unix)]
const EINVAL: i32 = 22;

/// Whether an accept error means the listen socket itself is unusable.
///
/// Everything else (aborted handshakes, descriptor or buffer exhaustion,
/// interrupted calls) only affects the one accept and the loop keeps going.
pub fn is_fatal_accept_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::InvalidInput || is_dead_socket_errno(err)
}

#[cfg(unix)]
fn is_dead_socket_errno(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(EBADF) | Some(EINVAL))
}

#[cfg(not(unix))]
fn is_dead_socket_errno(_err: &io::Error) -> bool {
    false
}
