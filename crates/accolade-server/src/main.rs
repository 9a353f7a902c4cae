//! Accolade relay server
//!
//! WebSocket notification relay with reviewer presence.

use std::path::PathBuf;
use std::sync::Arc;

use accolade_core::logging::init_subscriber;
use accolade_server::config::ServerConfig;
use accolade_server::identity::{DisabledVerifier, IdentityVerifier, SupabaseVerifier};
use accolade_server::metrics::install_recorder;
use accolade_server::server::RelayServer;
use accolade_settings::{load_settings, load_settings_from_path};
use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "accolade-relay")]
#[command(version, about = "Accolade relay - real-time notifications and reviewer presence")]
struct Args {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.accolade/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => load_settings().context("loading settings")?,
    };
    init_subscriber(&settings.logging.level, args.log_json || settings.logging.json);

    info!(version = env!("CARGO_PKG_VERSION"), "starting accolade-relay");

    let mut config = ServerConfig::from(&settings);
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let verifier: Arc<dyn IdentityVerifier> =
        match SupabaseVerifier::from_settings(&settings.identity) {
            Ok(v) => Arc::new(v),
            Err(e) => {
                warn!(error = %e, "identity backend unavailable, every authenticate will fail");
                Arc::new(DisabledVerifier)
            }
        };

    let mut server = RelayServer::new(config, verifier);
    match install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics disabled"),
    }

    let handle = server.listen().await.context("binding listener")?;
    info!(addr = %handle.addr, "relay ready");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received");
    handle.shutdown(None).await;
    info!("relay stopped");
    Ok(())
}
