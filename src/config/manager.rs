//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

const ENV_LISTEN_ADDR: &str = "RUSTFORWARD_LISTEN_ADDR";
const ENV_REMOTE_ADDR: &str = "RUSTFORWARD_REMOTE_ADDR";
const ENV_BUFFER_SIZE: &str = "RUSTFORWARD_BUFFER_SIZE";
const ENV_MAX_CONNECTIONS: &str = "RUSTFORWARD_MAX_CONNECTIONS";
const ENV_CONNECT_TIMEOUT: &str = "RUSTFORWARD_CONNECT_TIMEOUT";
const ENV_LOG_LEVEL: &str = "RUSTFORWARD_LOG_LEVEL";

const MIN_BUFFER_SIZE: usize = 64;
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a TOML file, falling back to defaults when it is missing
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config = Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse configuration from TOML text without validating it
    pub fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn load_from_env() -> Result<Config> {
        let config = Self::apply_env(Config::default(), |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env<F>(mut config: Config, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen_addr) = lookup(ENV_LISTEN_ADDR) {
            config.server.listen_addr = listen_addr;
        }

        if let Some(remote_addr) = lookup(ENV_REMOTE_ADDR) {
            config.server.remote_addr = remote_addr;
        }

        if let Some(buffer_size) = lookup(ENV_BUFFER_SIZE) {
            config.relay.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid {}: {}", ENV_BUFFER_SIZE, buffer_size))?;
        }

        if let Some(max_conn) = lookup(ENV_MAX_CONNECTIONS) {
            config.server.max_connections = Some(
                max_conn
                    .parse::<usize>()
                    .with_context(|| format!("Invalid {}: {}", ENV_MAX_CONNECTIONS, max_conn))?,
            );
        }

        if let Some(timeout) = lookup(ENV_CONNECT_TIMEOUT) {
            config.server.connect_timeout = Some(
                humantime::parse_duration(&timeout)
                    .with_context(|| format!("Invalid {}: {}", ENV_CONNECT_TIMEOUT, timeout))?,
            );
        }

        if let Some(log_level) = lookup(ENV_LOG_LEVEL) {
            config.monitoring.log_level = log_level;
        }

        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        // Addresses are only checked for presence; resolution happens at bind/dial time
        if self.server.listen_addr.trim().is_empty() {
            bail!("listen_addr must not be empty");
        }

        if self.server.remote_addr.trim().is_empty() {
            bail!("remote_addr must not be empty");
        }

        if self.server.max_connections == Some(0) {
            bail!("max_connections must be greater than 0 when set");
        }

        if let Some(timeout) = self.server.connect_timeout {
            if timeout.is_zero() {
                bail!("connect_timeout must be greater than 0 when set");
            }
        }

        if self.server.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.buffer_size < MIN_BUFFER_SIZE {
            bail!("buffer_size must be at least {} bytes", MIN_BUFFER_SIZE);
        }

        if self.relay.buffer_size > MAX_BUFFER_SIZE {
            bail!("buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!("monitoring.log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        listen: Option<&str>,
        remote: Option<&str>,
        max_connections: Option<usize>,
        connect_timeout: Option<std::time::Duration>,
        buffer_size: Option<usize>,
        trace_payload: bool,
    ) {
        if let Some(listen) = listen {
            self.server.listen_addr = listen.to_string();
            tracing::info!("CLI override: listen address set to {}", listen);
        }

        if let Some(remote) = remote {
            self.server.remote_addr = remote.to_string();
            tracing::info!("CLI override: remote address set to {}", remote);
        }

        if let Some(max_conn) = max_connections {
            self.server.max_connections = Some(max_conn);
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        if let Some(timeout) = connect_timeout {
            self.server.connect_timeout = Some(timeout);
            tracing::info!("CLI override: connect timeout set to {:?}", timeout);
        }

        if let Some(buffer_size) = buffer_size {
            self.relay.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        if trace_payload {
            self.relay.trace_payload = true;
            tracing::info!("CLI override: payload tracing enabled");
        }
    }
}
