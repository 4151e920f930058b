#![forbid(unsafe_code)]

//! Peer client binary: a line-oriented shell over the session controller.
//!
//! Input lines starting with `#` are control commands; everything else is
//! chat addressed by peer ID. Output lines (chat and hints) go to stdout,
//! logs to stderr or `--logfile`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use keyhole_cli::Session;
use keyhole_core::ClientConfig;

#[derive(Debug, Parser)]
#[command(
    name = "keyhole-cli",
    about = "NAT hole-punching chat client",
    version
)]
struct Args {
    /// Local bind address (ip:port); the port doubles as the peer listener.
    #[arg(long)]
    laddr: Option<String>,

    /// Rendezvous server address (ip:port).
    #[arg(long)]
    raddr: Option<String>,

    /// Punch burst count.
    #[arg(long)]
    n: Option<u32>,

    /// Server response timeout in seconds.
    #[arg(long)]
    t: Option<u64>,

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
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(laddr) = args.laddr {
        config.laddr = laddr;
    }
    if let Some(raddr) = args.raddr {
        config.raddr = raddr;
    }
    if let Some(n) = args.n {
        config.punch_burst = n;
    }
    if let Some(t) = args.t {
        config.reply_timeout_secs = t;
    }
    if let Some(logfile) = args.logfile {
        config.logfile = Some(logfile);
    }
    init_tracing(config.logfile.as_deref())?;

    let (session, mut output) = Session::connect(config).await?;
    println!("commands: #login <name> | #logout | #get <id> | #punch <id> | <peer-id> <text>");

    tokio::spawn(async move {
        while let Some(line) = output.recv().await {
            println!("{line}");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let hint = session.exec_line(line).await;
        if !hint.is_empty() {
            println!("{hint}");
        }
    }
    Ok(())
}
