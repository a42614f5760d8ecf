//! Management API Module
//!
//! Read-only REST API reporting forwarder status and sessions.

pub mod api;
pub mod handlers;
pub mod server;
pub mod types;

pub use api::ManagementApi;
pub use handlers::AppState;
pub use server::ManagementServer;
pub use types::*;
