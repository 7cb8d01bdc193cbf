//! IGD Agent - keeps ports forwarded on UPnP Internet Gateway Devices.
//!
//! Discovers the gateways on the local network, reports their external
//! addresses and link rates, and maintains the configured port mappings
//! until shut down, at which point the mappings it created are removed.

mod config;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use igd_core::{bootstrap_services, ForwardPort, PortStatusListener, TaskSpawner};
use tokio::signal;

use crate::config::{parse_port_spec, ServerConfig};

/// IGD Agent - UPnP external address detection and port forwarding.
#[derive(Parser, Debug)]
#[command(name = "igd-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "IGD_AGENT_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Callback/status HTTP port (overrides config file).
    #[arg(short = 'p', long, env = "IGD_AGENT_BIND_PORT")]
    port: Option<u16>,

    /// Port to forward as `name=port[/proto]`; repeatable, replaces configured ports.
    #[arg(short = 'f', long = "forward", value_parser = parse_port_spec)]
    forward: Vec<ForwardPort>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("IGD Agent v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if !args.forward.is_empty() {
        config.ports = args.forward;
    }

    log::info!(
        "Configuration: bind_port={}, ports={}, reconcile_interval={}s",
        config.bind_port,
        config.ports.len(),
        config.reconcile_interval
    );

    let services =
        bootstrap_services(config.to_core_config()).context("Failed to bootstrap services")?;
    let port = services
        .start()
        .await
        .context("Failed to start services")?;

    log::info!("HTTP server started on port {}", port);

    // Report the external addresses once discovery has settled
    let gateway = Arc::clone(&services.gateway);
    services.spawner.spawn(async move {
        let addresses = gateway.external_ips().await;
        if addresses.is_empty() {
            log::warn!("No external address detected");
        }
        for detected in addresses {
            log::info!("External address: {}", detected.address);
        }
        match (
            gateway.upstream_max_bit_rate().await,
            gateway.downstream_max_bit_rate().await,
        ) {
            (Some(up), Some(down)) => log::info!("Link rates: {} up / {} down (bit/s)", up, down),
            _ => log::info!("Link rates unknown"),
        }
    });

    // Reconcile the configured ports in the background; the first pass waits for boot
    if !config.ports.is_empty() {
        let ports: HashSet<ForwardPort> = config.ports.iter().cloned().collect();
        let gateway = Arc::clone(&services.gateway);
        let listener: Arc<dyn PortStatusListener> = services.status_board.clone();
        services.spawner.spawn(async move {
            gateway.set_desired_ports(ports, listener).await;
        });
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: removes created mappings and ends subscriptions
    services.shutdown().await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
