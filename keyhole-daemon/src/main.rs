#![forbid(unsafe_code)]

//! Rendezvous server binary.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::info;

use keyhole_core::ServerConfig;
use keyhole_daemon::RendezvousServer;

#[derive(Debug, Parser)]
#[command(
    name = "keyhole-daemon",
    about = "UDP rendezvous server for keyhole peers",
    version
)]
struct Args {
    /// UDP listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Optional TOML configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing(logfile: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match logfile {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(logfile) = args.logfile {
        config.logfile = Some(logfile);
    }
    init_tracing(config.logfile.as_deref())?;

    let server = RendezvousServer::start(config).await?;
    info!("serving on {}", server.local_addr());

    // Receive loop and sweeper run until the process is told to stop.
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
