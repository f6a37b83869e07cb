use anyhow::Result;
use beach_ring::{
    config::{Cli, ServerConfig},
    telemetry::Telemetry,
};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        ws_path = %config.ws_path,
        "starting beach-ring"
    );

    beach_ring::run(config, Some(telemetry.metrics_handle())).await
}
