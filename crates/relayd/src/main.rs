//! # relayd
//!
//! Tunnel relay binary. Loads layered settings, starts the registry loop and
//! the HTTP/WebSocket listener, and drains on Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::RelaySettings;
use tracing::{info, warn};

/// Tunnel relay server.
#[derive(Parser, Debug)]
#[command(name = "relayd", about = "Tunnel relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(relay_settings::settings_path)
    }

    /// Command-line flags win over the file and the environment.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn resolve_settings(args: &Cli) -> Result<RelaySettings> {
    let path = args.settings_path();
    let mut settings = relay_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn init_logging(settings: &RelaySettings) {
    if settings.logging.json {
        relay_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        relay_core::logging::init_subscriber(&settings.logging.level);
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = terminate.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = resolve_settings(&args)?;
    init_logging(&settings);

    let metrics = match relay_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let config = ServerConfig::from(&settings);
    let drain_timeout = config.drain_timeout;
    let server = RelayServer::new(config, metrics);
    let handle = server
        .listen()
        .await
        .context("Failed to bind relay listener")?;
    info!("relay listening on http://{}", handle.addr());

    shutdown_signal().await?;

    info!("shutting down");
    if !server.stop().await {
        warn!("connections still open after drain timeout");
    }
    match tokio::time::timeout(drain_timeout, handle.wait()).await {
        Ok(res) => res.context("HTTP server failed")?,
        Err(_) => warn!("HTTP server did not stop within drain timeout"),
    }

    info!("shutdown complete");
    Ok(())
}
