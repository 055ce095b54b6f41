//! CLI for ssehub
//!
//! Loads configuration, starts the hub and serves HTTP until a termination
//! signal arrives, then shuts the hub down.

use clap::Parser;
use ssehub::broker::Hub;
use ssehub::config::{DEFAULT_CONFIG_FILE, Settings, load_config_from};
use ssehub::transport::start_http_server;
use ssehub::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ssehub", about = "Server-Sent-Events publish/subscribe hub")]
struct Cli {
    /// Configuration file to load, without extension
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(long, env = "SSEHUB_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(cli.log_level.as_deref().unwrap_or(&config.log.level));

    if let Err(e) = run(config).await {
        error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let hub = Hub::new(config.hub.clone());

    let result = start_http_server(&addr, hub.clone(), async {
        if let Err(e) = shutdown_signal().await {
            error!("Unable to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received. Exiting gracefully.");
    })
    .await;

    hub.shutdown().await?;
    result?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
