//! Connection Module
//!
//! Listener loop and remote pairing.

pub mod acceptor;
pub mod connector;
pub mod listener;

pub use acceptor::{is_fatal_accept_error, Acceptor};
pub use connector::{probe, RemoteConnector};
pub use listener::TcpProxy;
