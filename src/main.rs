//! RustForward - Transparent TCP Forwarding Proxy

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rustforward::{
    config::{Config, ConfigManager},
    connection::probe,
    management::ManagementServer,
    metrics::Metrics,
    ShutdownCoordinator, TcpProxy,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// CLI arguments for RustForward
#[derive(Parser, Debug)]
#[command(name = "rustforward")]
#[command(about = "RustForward - Transparent TCP forwarding proxy")]
#[command(version)]
#[command(long_about = "
RustForward - Transparent TCP forwarding proxy

Accepts TCP connections on a listen address and relays each one, byte for
byte, to a single fixed remote address.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  RUSTFORWARD_LISTEN_ADDR      - Listen address (e.g., 0.0.0.0:9000)
  RUSTFORWARD_REMOTE_ADDR      - Remote target (e.g., 10.0.0.5:22)
  RUSTFORWARD_BUFFER_SIZE      - Relay buffer size in bytes
  RUSTFORWARD_MAX_CONNECTIONS  - Maximum concurrent connections
  RUSTFORWARD_CONNECT_TIMEOUT  - Remote dial timeout (e.g., 5s)
  RUSTFORWARD_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    #[arg(short, long, default_value = "rustforward.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    #[arg(short, long, help = "Listen address (e.g., 127.0.0.1:9000)")]
    pub listen: Option<String>,

    #[arg(short, long, help = "Remote target address (e.g., 127.0.0.1:9100)")]
    pub remote: Option<String>,

    #[arg(long, help = "Relay buffer size in bytes")]
    pub buffer_size: Option<usize>,

    #[arg(long, help = "Maximum number of concurrent connections")]
    pub max_connections: Option<usize>,

    #[arg(long, value_parser = humantime::parse_duration, help = "Remote dial timeout (e.g., 5s)")]
    pub connect_timeout: Option<Duration>,

    #[arg(long, help = "Log level (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Log every forwarded chunk at trace level")]
    pub trace_payload: bool,

    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,

    #[arg(long, help = "Check that the remote target accepts connections and exit")]
    pub probe: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config_present = args.config.exists();
    let mut config = if config_present {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.listen.as_deref(),
        args.remote.as_deref(),
        args.max_connections,
        args.connect_timeout,
        args.buffer_size,
        args.trace_payload,
    );
    if let Some(level) = &args.log_level {
        config.monitoring.log_level = level.clone();
    }

    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&args, &config)?;

    info!("Starting RustForward v{}", env!("CARGO_PKG_VERSION"));
    if config_present {
        info!("Configuration loaded from {}", args.config.display());
    } else {
        info!("Config file {} not found, using environment and defaults", args.config.display());
    }

    if args.validate_config {
        info!("Configuration is valid");
        log_summary(&config);
        return Ok(());
    }

    if args.probe {
        let remote = &config.server.remote_addr;
        let limit = config.server.connect_timeout.unwrap_or(PROBE_TIMEOUT);
        if probe(remote, limit).await {
            info!("Remote target {} is reachable", remote);
            return Ok(());
        }
        anyhow::bail!("Remote target {} is not reachable", remote);
    }

    log_summary(&config);

    let config = Arc::new(config);
    let shutdown_coordinator = ShutdownCoordinator::new();
    let metrics = Arc::new(
        Metrics::new(config.monitoring.max_recent_sessions)
            .context("Failed to register metrics")?,
    );

    let proxy = Arc::new(TcpProxy::from_config(Arc::clone(&config)).with_observer(metrics.clone()));

    let management_handle = if config.monitoring.management_api.enabled {
        let management_server = ManagementServer::new(
            config.monitoring.management_api.bind_addr,
            Arc::clone(&config),
            metrics.clone(),
        );

        Some(tokio::spawn(async move {
            if let Err(e) = management_server.start().await {
                error!("Management API server error: {:#}", e);
            }
        }))
    } else {
        info!("Management API server disabled");
        None
    };

    // Bind before announcing so a busy port fails the process
    let listener = proxy.bind().await?;

    let mut server_handle = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.serve(listener).await })
    };

    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    let outcome = tokio::select! {
        result = &mut server_handle => Some(result),
        signal = shutdown_coordinator.listen_for_signals() => {
            if let Err(e) = signal {
                error!("Error setting up signal handlers: {}", e);
            }
            None
        }
    };

    if let Err(e) = shutdown_coordinator.shutdown_proxy(&proxy).await {
        warn!("Error during connection cleanup: {:#}", e);
    }

    if let Some(handle) = management_handle {
        handle.abort();
        info!("Management API server shutdown");
    }

    let served = match outcome {
        Some(result) => result,
        None => server_handle.await,
    };

    match served {
        Ok(Ok(())) => {
            info!("Server shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Listener stopped: {:#}", e);
            Err(e)
        }
        Err(e) => Err(anyhow::anyhow!("Server task failed: {}", e)),
    }
}

fn log_summary(config: &Config) {
    info!("  Listen address: {}", config.server.listen_addr);
    info!("  Remote address: {}", config.server.remote_addr);
    info!("  Buffer size: {} bytes", config.relay.buffer_size);
    match config.server.max_connections {
        Some(max) => info!("  Max connections: {}", max),
        None => info!("  Max connections: unlimited"),
    }
    match config.server.connect_timeout {
        Some(limit) => info!("  Connect timeout: {:?}", limit),
        None => info!("  Connect timeout: none"),
    }
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
