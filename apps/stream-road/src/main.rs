use anyhow::Result;
use clap::Parser;
use tracing::info;

use stream_road::cli::{self, Cli, Commands};
use stream_road::config::ServerConfig;
use stream_road::server;
use stream_road::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;
    let cli = Cli::parse();

    if let Some(Commands::Probe {
        url,
        stream,
        timeout,
    }) = cli.command
    {
        let outcome = cli::run_probe(url, stream, timeout).await?;
        info!(?outcome, "probe finished");
        return Ok(());
    }

    let config = ServerConfig::try_from(cli.serve)?;
    info!(
        host = %config.host,
        streamer_port = config.streamer_port,
        viewer_port = config.viewer_port,
        gps_input_port = config.gps_input_port,
        gps_output_port = config.gps_output_port,
        on_collision = ?config.collision_policy,
        "starting stream-road"
    );

    server::run(config, telemetry.metrics_handle()).await
}
