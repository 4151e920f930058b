#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Keyhole UDP transport adapter.
//!
//! * Single `UdpSocket` bound with address reuse (`SO_REUSEPORT` when
//!   supported) so one local port is both the source of server-bound packets
//!   and the listener peers punch toward.
//! * Async receive loop dispatches datagrams to a handler trait; the loop is
//!   the socket's only reader.
//! * Hole-punch state and burst loops live in [`punch`].

use async_trait::async_trait;
use socket2::{Domain, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::error;

pub mod punch;

use keyhole_core::proto::MAX_DATAGRAM;

/// Trait for components that consume inbound datagrams.
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    async fn handle_packet(&self, src: SocketAddr, data: &[u8]);
}

/// UDP socket pool: wraps a single socket but keeps Arc for sharing.
#[derive(Clone)]
pub struct UdpPool {
    socket: Arc<UdpSocket>,
}

impl UdpPool {
    /// Bind `addr` with address reuse (and reuse_port where the OS has it).
    ///
    /// The reuse flags are what lets a client keep one NAT mapping for both
    /// server and peer traffic; do not split this into two sockets.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        // Build the socket manually so the reuse options land before bind.
        let domain = Domain::for_address(addr);
        let socket = socket2::Socket::new(domain, Type::DGRAM, None)?;
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
        socket.set_reuse_port(true)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        let std_sock: std::net::UdpSocket = socket.into();
        std_sock.set_nonblocking(true)?;
        let udp = UdpSocket::from_std(std_sock)?;
        Ok(Self {
            socket: Arc::new(udp),
        })
    }

    /// Send one datagram, treating a short write as an error.
    pub async fn send_to(&self, addr: SocketAddr, data: &[u8]) -> io::Result<()> {
        let n = self.socket.send_to(data, addr).await?;
        if n != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram write: {n} of {} bytes", data.len()),
            ));
        }
        Ok(())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }
}

/// Main transport adapter. Spawns the RX task and exposes the TX API.
///
/// Sends may come from any task; `tokio::net::UdpSocket` serializes them per
/// datagram, which is the write discipline a shared socket needs.
#[derive(Clone)]
pub struct Transport {
    pool: UdpPool,
}

impl Transport {
    /// Start the receive loop; `handler` sees every inbound datagram.
    pub fn start<H: PacketHandler>(pool: UdpPool, handler: Arc<H>) -> Self {
        let rx_sock = pool.socket();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match rx_sock.recv_from(&mut buf).await {
                    Ok((len, src)) => {
                        handler.handle_packet(src, &buf[..len]).await;
                    }
                    Err(e) => {
                        error!("udp recv error: {e}");
                    }
                }
            }
        });
        Self { pool }
    }

    /// Send one datagram.
    pub async fn send(&self, addr: SocketAddr, data: &[u8]) -> io::Result<()> {
        self.pool.send_to(addr, data).await
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.pool.local_addr()
    }
}
