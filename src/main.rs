use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use studio_async_bridge::config::BridgeConfig;
use studio_async_bridge::http::{self, AppState};
use studio_async_bridge::provider::TwilioClient;

#[derive(Parser)]
#[command(
    name = "studio-async-bridge",
    about = "Simulates a long-running async operation for Twilio Studio"
)]
struct Cli {
    /// Path to config file (default: <config_dir>/studio-async-bridge/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config file and PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!(error = %e, "failed to load .env file");
        }
    }

    let cli = Cli::parse();

    let mut config = BridgeConfig::load(cli.config.as_ref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    info!(
        account = %config.account_sid,
        api = %config.api_base_url,
        delay_min_secs = config.delay.min_secs,
        delay_max_secs = config.delay.max_secs,
        "loaded config"
    );

    let provider = Arc::new(TwilioClient::with_base_url(
        &config.account_sid,
        &config.auth_token,
        &config.api_base_url,
    ));
    let cancel = CancellationToken::new();
    let state = AppState::new(provider, config.delay, cancel.clone());

    let listener = TcpListener::bind(config.address())
        .await
        .with_context(|| format!("failed to bind {}", config.address()))?;
    let server = http::spawn_http_server(listener, state, cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("received ctrl-c, shutting down");
    cancel.cancel();

    server.await.context("server task panicked")?;
    info!("server stopped");
    Ok(())
}
