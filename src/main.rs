use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use logging::Logger;
use orchestrator_config::ConfigManager;
use session_orchestrator::SessionOrchestrator;

/// Per-session compute unit orchestrator
#[derive(Debug, Parser)]
#[command(name = "sessiond", version, about)]
struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "SESSIOND_CONFIG")]
    config: Option<PathBuf>,

    /// Identity of this replica in leader election
    #[arg(long)]
    replica_id: Option<String>,

    /// Address of the HTTP API, e.g. 0.0.0.0:8000
    #[arg(long)]
    listen: Option<String>,
}

fn load_config(cli: &Cli) -> Result<ConfigManager> {
    let path = cli.config.as_deref().map(|p| p.to_string_lossy().into_owned());
    let loaded = ConfigManager::new(path.as_deref())?;

    if cli.replica_id.is_none() && cli.listen.is_none() {
        return Ok(loaded);
    }

    let mut settings = loaded.settings().clone();
    if let Some(replica_id) = &cli.replica_id {
        settings.replica_id = Some(replica_id.clone());
    }
    if let Some(listen) = &cli.listen {
        settings.listen_addr = listen.clone();
    }
    ConfigManager::from_settings(settings)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_manager = Arc::new(load_config(&cli)?);
    let settings = config_manager.settings().clone();

    let _logger = Logger::init(&settings.log)?;

    if let Some(addr) = &settings.metrics_listen_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid metrics_listen_addr: {}", addr))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Prometheus exporter listening on {}", addr);
    }

    let orchestrator = SessionOrchestrator::new(config_manager)?;
    orchestrator.start().await?;

    let addr: SocketAddr = settings
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr: {}", settings.listen_addr))?;
    info!("Session API listening on {}", addr);

    let served = axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {}", addr))?
        .serve(orchestrator.router().into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Stop the loops even if the server failed
    orchestrator.stop().await?;
    served.context("HTTP server failed")?;

    info!("Session orchestrator stopped");
    Ok(())
}
