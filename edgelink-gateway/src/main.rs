/**
 * EDGELINK GATEWAY - process entry point
 *
 * ROLE: load `.env` and the YAML config, set up tracing, build the gateway
 * from its feature flags, run until Ctrl-C, then stop every adapter.
 */

use anyhow::Context;
use edgelink_gateway::config::load_config;
use edgelink_gateway::GatewayDeviceApp;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("edgelink_gateway=info")),
        )
        .init();

    let config = load_config().await.context("loading gateway config")?;
    let app = GatewayDeviceApp::new(config);
    app.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown requested");

    app.stop().await;
    Ok(())
}
