//! RustForward Library
//!
//! Transparent TCP forwarding proxy: every connection accepted on the listen
//! address is paired with a fresh connection to one fixed remote target and
//! bytes are relayed unchanged in both directions until either side closes.

pub mod config;
pub mod connection;
pub mod management;
pub mod metrics;
pub mod relay;
pub mod resource;
pub mod shutdown;

pub use config::Config;
pub use connection::TcpProxy;
pub use metrics::{Metrics, SessionObserver};
pub use shutdown::ShutdownCoordinator;

/// Common error type for the forwarder
pub type Result<T> = anyhow::Result<T>;
