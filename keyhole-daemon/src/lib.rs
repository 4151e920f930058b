#![forbid(unsafe_code)]

//! Keyhole rendezvous daemon library.
//!
//! One UDP socket, three activities: the transport receive loop feeding
//! [`handler::RendezvousHandler`], the handler dispatching commands against
//! the [`registry::Registry`], and a periodic sweeper evicting clients whose
//! heartbeats stopped. Server state is in-memory only; a restart forgets
//! every client.

pub mod handler;
pub mod registry;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tracing::info;

use keyhole_core::types::unix_now;
use keyhole_core::{Result, ServerConfig};
use keyhole_transport::{Transport, UdpPool};

use handler::RendezvousHandler;
use registry::Registry;

/// A running rendezvous service.
pub struct RendezvousServer {
    registry: Arc<Registry>,
    local_addr: SocketAddr,
}

impl RendezvousServer {
    /// Bind the socket and start the receive loop and sweeper.
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
        let pool = UdpPool::bind(addr).await?;
        let local_addr = pool.local_addr()?;
        let registry = Arc::new(Registry::new());

        let handler = Arc::new(RendezvousHandler::new(registry.clone(), pool.clone()));
        Transport::start(pool, handler);

        let sweeper = registry.clone();
        let timeout_secs = config.client_timeout_secs;
        let interval = config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = sweeper.sweep(unix_now(), timeout_secs);
                if evicted > 0 {
                    info!(evicted, "swept stale clients");
                }
            }
        });

        info!(%local_addr, "rendezvous server listening");
        Ok(Self {
            registry,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry handle, exposed for inspection in tests.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
