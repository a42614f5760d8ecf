//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default size of the single in-flight chunk each pump holds
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Listener and remote target configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address the listener binds, e.g. `127.0.0.1:9000`
    pub listen_addr: String,
    /// Fixed remote target every accepted connection is paired with
    pub remote_addr: String,
    /// Cap on in-flight connections; unset means unlimited
    #[serde(default)]
    pub max_connections: Option<usize>,
    /// Dial timeout for the remote side; unset keeps the OS connect behavior
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Byte pump configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Log every forwarded chunk at trace level
    #[serde(default)]
    pub trace_payload: bool,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_recent_sessions")]
    pub max_recent_sessions: usize,
    #[serde(default)]
    pub management_api: ManagementApiConfig,
}

/// Status API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManagementApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_management_bind_addr")]
    pub bind_addr: SocketAddr,
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_recent_sessions() -> usize {
    1000
}

fn default_management_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9000".to_string(),
            remote_addr: "127.0.0.1:9100".to_string(),
            max_connections: None,
            connect_timeout: None,
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            trace_payload: false,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_recent_sessions: default_max_recent_sessions(),
            management_api: ManagementApiConfig::default(),
        }
    }
}

impl Default for ManagementApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_management_bind_addr(),
        }
    }
}

impl Config {
    /// Build a configuration for one listener/remote pair, everything else default
    pub fn for_addresses(listen_addr: impl Into<String>, remote_addr: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                listen_addr: listen_addr.into(),
                remote_addr: remote_addr.into(),
                ..ServerConfig::default()
            },
            ..Config::default()
        }
    }
}
