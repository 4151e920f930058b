//! Hole-punch engine: per-endpoint state for the active and passive sides
//! plus the timed burst loops that open NAT bindings.
//!
//! Both sides burst their opening packets because UDP is lossy; a single
//! delivery in either direction is enough for both NATs to install a binding.
//! The per-endpoint `done` flag, set by the receive loop, short-circuits a
//! burst once a packet from the remote endpoint is heard.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::net::SocketAddr;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use keyhole_core::proto::{self, PeerIdentity};

use crate::UdpPool;

#[derive(Debug, Error)]
pub enum PunchError {
    /// Active punch attempted before a successful `get` registered the
    /// endpoint. Local precondition failure, nothing was sent.
    #[error("no punch entry for {0}, run get first")]
    NotRegistered(SocketAddr),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default)]
struct PunchEntry {
    /// Set by the receive loop when a packet from this endpoint is heard.
    done: bool,
}

/// Punch state keyed by endpoint string, shared between the receive loop
/// (which marks endpoints heard) and the burst loops (which poll the flag).
#[derive(Default)]
pub struct PunchSet {
    entries: DashMap<String, PunchEntry>,
}

impl PunchSet {
    /// Register `addr` for an upcoming round, resetting any previous state.
    pub fn register(&self, addr: SocketAddr) {
        self.entries.insert(addr.to_string(), PunchEntry::default());
    }

    /// Mark the endpoint heard. Returns false when the endpoint was never
    /// registered, i.e. no `get` or introduction preceded the packet.
    pub fn mark_done(&self, addr: SocketAddr) -> bool {
        match self.entries.get_mut(&addr.to_string()) {
            Some(mut entry) => {
                entry.done = true;
                true
            }
            None => false,
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn is_done(&self, key: &str) -> bool {
        self.entries.get(key).map(|e| e.done).unwrap_or(false)
    }

    fn clear_done(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.done = false;
        }
    }
}

/// Timing knobs for one punch round.
#[derive(Debug, Clone, Copy)]
pub struct PunchConfig {
    /// Datagrams emitted per round.
    pub burst: u32,
    /// Pause between datagrams.
    pub interval: Duration,
}

impl Default for PunchConfig {
    fn default() -> Self {
        Self {
            burst: 30,
            interval: Duration::from_millis(100),
        }
    }
}

/// Active and passive punch state machines sharing the client's one socket.
pub struct Puncher {
    pool: UdpPool,
    config: PunchConfig,
    /// Endpoints this client is currently punching toward.
    pub active: PunchSet,
    /// Endpoints the server announced will punch us.
    pub passive: PunchSet,
}

impl Puncher {
    pub fn new(pool: UdpPool, config: PunchConfig) -> Self {
        Self {
            pool,
            config,
            active: PunchSet::default(),
            passive: PunchSet::default(),
        }
    }

    /// Active round: burst punch requests toward `peer` until the reply is
    /// heard or the burst is exhausted. The endpoint must have been
    /// registered by a successful `get`.
    ///
    /// The opening request is unconditional: under cone NAT no reply can
    /// precede it, and it is what teaches the passive side our identity.
    /// The `done` flag is reset afterwards so a later round toward the same
    /// endpoint starts clean.
    pub async fn punch_out(
        &self,
        peer: SocketAddr,
        identity: &PeerIdentity,
    ) -> Result<(), PunchError> {
        let key = peer.to_string();
        if !self.active.contains(&key) {
            return Err(PunchError::NotRegistered(peer));
        }
        let packet = proto::punch_request(identity);
        self.pool.send_to(peer, packet.as_bytes()).await?;
        for _ in 1..self.config.burst {
            sleep(self.config.interval).await;
            if self.active.is_done(&key) {
                info!(%peer, "punch reply heard, ending burst early");
                break;
            }
            self.pool.send_to(peer, packet.as_bytes()).await?;
        }
        self.active.clear_done(&key);
        Ok(())
    }

    /// Passive round: register the introduced endpoint, then burst punch
    /// replies until a request is heard or the burst is exhausted. The
    /// opening reply is likewise unconditional so the active side always
    /// learns our identity. A send failure ends the round; the active side
    /// re-punches if it needs to.
    pub async fn punch_back(&self, peer: SocketAddr, identity: &PeerIdentity) {
        self.passive.register(peer);
        let key = peer.to_string();
        let packet = proto::punch_reply(identity);
        if let Err(e) = self.pool.send_to(peer, packet.as_bytes()).await {
            warn!(%peer, "punch reply send failed: {e}");
            return;
        }
        for _ in 1..self.config.burst {
            sleep(self.config.interval).await;
            if self.passive.is_done(&key) {
                info!(%peer, "punch request heard, ending burst early");
                break;
            }
            if let Err(e) = self.pool.send_to(peer, packet.as_bytes()).await {
                warn!(%peer, "punch reply send failed: {e}");
                break;
            }
        }
    }
}
