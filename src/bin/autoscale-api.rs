use anyhow::Context;
use autoscale_core::{api, logging, Config};

const API_DESCRIPTION: &str = "Autoscale Coordinator API - heartbeat sync callbacks for firewall clusters";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    logging::init(&config.logging).context("initializing logging")?;

    tracing::info!("Starting {} on {}", API_DESCRIPTION, config.bind_addr());
    tracing::info!("API Version: {}", env!("CARGO_PKG_VERSION"));

    api::run(&config).await.context("running API server")?;
    Ok(())
}
