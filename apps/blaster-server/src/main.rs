//! Blaster Server - standalone headless server for the LAN media-blaster
//! pipeline.
//!
//! Runs the Media Origin and blast-trigger HTTP API as a background
//! daemon, with no GUI.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use blaster_core::api::{self, ApiState};
use blaster_core::bootstrap::bootstrap_services_with_network;
use blaster_core::context::LocalIpDetector;
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;

/// Headless blast-pipeline server: serves a clip to LAN media renderers on command.
#[derive(Parser, Debug)]
#[command(name = "blaster-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "BLASTER_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port for the Media Origin and trigger API (overrides config file).
    #[arg(short = 'p', long, env = "BLASTER_BIND_PORT")]
    port: Option<u16>,

    /// Advertise IP address (overrides config file).
    #[arg(short = 'a', long, env = "BLASTER_ADVERTISE_IP")]
    advertise_ip: Option<std::net::IpAddr>,

    /// Path to the rule store JSON file (overrides config file).
    #[arg(short = 'r', long, env = "BLASTER_RULES_PATH")]
    rules: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("blaster-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
        config.blast.preferred_port = port;
    }
    if let Some(ip) = args.advertise_ip {
        config.advertise_ip = Some(ip);
    }
    if let Some(rules) = args.rules {
        config.rules_path = rules;
    }

    config
        .blast
        .validate()
        .context("Invalid blast configuration")?;

    let detector: Arc<dyn blaster_core::context::IpDetector> = Arc::new(LocalIpDetector);
    let mut services = bootstrap_services_with_network(
        config.blast.clone(),
        config.rules_path.clone(),
        config.advertise_ip,
        detector,
    )
    .context(
        "Failed to bootstrap services. If IP auto-detection failed, pass \
         --advertise-ip or set BLASTER_ADVERTISE_IP to an IP renderers can reach.",
    )?;

    services.start().await.context("Failed to start Media Origin")?;
    log::info!(
        "Media Origin listening on {}",
        services.network.url_builder().base_url()
    );

    let api_state = Arc::new(ApiState {
        config: services.config.clone(),
        client: services.http_client.clone(),
        network: services.network.clone(),
        origin: services.origin.clone(),
        bus: services.bus.clone(),
        cancel: services.cancel.clone(),
        rule_store: services.rule_store.clone(),
    });
    let api_router = api::router(api_state);
    let api_addr: std::net::SocketAddr = ([0, 0, 0, 0], services.network.get_port() + 1).into();
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .context("Failed to bind trigger API listener")?;
    log::info!("Trigger API listening on {api_addr}");
    let api_handle = tokio::spawn(async move {
        let _ = axum::serve(api_listener, api_router).await;
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;
    api_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
