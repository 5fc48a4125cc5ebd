use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};

use sysflux::agent::Agent;
use sysflux::config::load_config;
use sysflux::init_logging;
use sysflux::sink::{InfluxSink, MemorySink};

#[derive(Parser, Debug)]
#[command(author, version, about = "System metrics collection agent for InfluxDB")]
struct Args {
    /// Path to the configuration file (toml, json or yaml)
    #[arg(short, long, default_value = "/etc/sysflux/config.toml")]
    config: PathBuf,

    /// Collect and log points without writing to InfluxDB
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    init_logging(&config.log_level);

    info!("sysflux {} starting", sysflux::VERSION);

    let agent = Agent::new(config.clone());
    let handle = if args.dry_run {
        info!("Dry run: points are logged, not written");
        agent.start(Arc::new(MemorySink::for_dry_run())).await?
    } else {
        let sink = Arc::new(InfluxSink::new(&config.influx)?);
        agent.start(sink).await?
    };

    wait_for_stop_signal().await?;
    info!("Stop signal received; draining");

    if let Err(e) = handle.shutdown().await {
        error!("Shutdown incomplete: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn wait_for_stop_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}
