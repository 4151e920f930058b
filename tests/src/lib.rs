#![forbid(unsafe_code)]

//! Shared helpers for the keyhole end-to-end suite: a rendezvous server on an
//! ephemeral loopback port, and a bare UDP control client for driving the
//! wire protocol directly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use keyhole_core::ServerConfig;
use keyhole_daemon::RendezvousServer;

/// How long a test waits for any single expected datagram.
pub const REPLY_WAIT: Duration = Duration::from_secs(2);

/// Start a server with default timings on an ephemeral port, returning the
/// loopback address clients should dial.
pub async fn start_server() -> Result<(RendezvousServer, SocketAddr)> {
    start_server_with(ServerConfig {
        port: 0,
        ..ServerConfig::default()
    })
    .await
}

pub async fn start_server_with(config: ServerConfig) -> Result<(RendezvousServer, SocketAddr)> {
    let server = RendezvousServer::start(config).await?;
    // The daemon binds the unspecified address; tests dial it via loopback.
    let mut addr = server.local_addr();
    addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
    Ok((server, addr))
}

/// Minimal wire-level client: one socket, send text, expect text.
pub struct ControlClient {
    sock: UdpSocket,
    server: SocketAddr,
}

impl ControlClient {
    pub async fn connect(server: SocketAddr) -> Result<Self> {
        let sock = UdpSocket::bind("127.0.0.1:0").await?;
        Ok(Self { sock, server })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.sock.local_addr()?)
    }

    pub async fn send(&self, msg: &str) -> Result<()> {
        self.sock.send_to(msg.as_bytes(), self.server).await?;
        Ok(())
    }

    pub async fn recv(&self) -> Result<String> {
        let mut buf = [0u8; 1024];
        let (n, _) = timeout(REPLY_WAIT, self.sock.recv_from(&mut buf)).await??;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    pub async fn roundtrip(&self, msg: &str) -> Result<String> {
        self.send(msg).await?;
        self.recv().await
    }

    /// Assert the server stays silent for `dur`.
    pub async fn expect_no_reply(&self, dur: Duration) -> Result<()> {
        let mut buf = [0u8; 1024];
        match timeout(dur, self.sock.recv_from(&mut buf)).await {
            Ok(received) => {
                let (n, src) = received?;
                bail!(
                    "unexpected datagram from {src}: {}",
                    String::from_utf8_lossy(&buf[..n])
                );
            }
            Err(_) => Ok(()),
        }
    }
}

/// Poll `cond` until it holds or `dur` elapses.
pub async fn wait_for<F: Fn() -> bool>(cond: F, dur: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + dur;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
