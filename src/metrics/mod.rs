//! Metrics Module
//!
//! Session observation, collection and Prometheus export.

pub mod collector;
pub mod observer;
pub mod types;

pub use collector::Metrics;
pub use observer::{NoopObserver, SessionObserver};
pub use types::{ActiveSessionInfo, LinkStatus, MetricsRegistry, MetricsSnapshot};
