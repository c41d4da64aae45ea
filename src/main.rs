use anyhow::{anyhow, Context};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::net::lookup_host;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lockstep_tftp::worker;
use lockstep_tftp::{Cli, Command, Outcome, Server, TransferConfig, UdpTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();
    let serve_config = args.command.serve_config();
    match args.command {
        Command::Serve { ip, port, .. } => {
            let config = serve_config.ok_or_else(|| anyhow!("missing serve config"))?;
            let server = Server::bind(SocketAddr::new(ip, port), config).await?;
            server.run(shutdown_signal()).await
        }
        Command::Get {
            server,
            filename,
            port,
            output,
            transfer,
        } => {
            let config = TransferConfig::from(&transfer);
            get(&server, port, &filename, output, &config).await
        }
    }
}

async fn get(
    host: &str,
    port: u16,
    filename: &str,
    output: Option<PathBuf>,
    config: &TransferConfig,
) -> anyhow::Result<()> {
    let server = lookup_host((host, port))
        .await
        .with_context(|| format!("cannot resolve {host}"))?
        .next()
        .ok_or_else(|| anyhow!("no address for {host}"))?;
    let output = output.unwrap_or_else(|| PathBuf::from(filename));

    let transport = UdpTransport::ephemeral_for(server).await?;
    let sink = File::create(&output)
        .await
        .with_context(|| format!("cannot create {}", output.display()))?;

    info!(%server, filename, output = %output.display(), "fetching");
    let outcome = worker::fetch(transport, server, filename, sink, config, shutdown_signal()).await;

    if let Outcome::Completed(bytes) = outcome {
        info!("received {bytes} bytes into {}", output.display());
        return Ok(());
    }
    // Leave no partial download behind.
    if let Err(e) = tokio::fs::remove_file(&output).await {
        warn!("cannot remove {}: {e}", output.display());
    }
    Err(anyhow!("transfer of {filename} {outcome}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
