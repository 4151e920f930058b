//! In-memory client registry with heartbeat-based liveness.
//!
//! Shared between the datagram handler and the sweeper task; every operation
//! is atomic per key, which is all the consistency the protocol needs.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use keyhole_core::{ClientId, TimestampSecs};

/// One registered client as the server sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub id: ClientId,
    /// Display name, arbitrary whitespace-free text.
    pub name: String,
    /// Public endpoint observed when the login datagram arrived.
    pub addr: SocketAddr,
    /// Unix seconds of the most recent heartbeat (login counts as one).
    pub last_heartbeat: TimestampSecs,
}

/// Process-wide ID to record mapping plus the ID allocator.
#[derive(Default)]
pub struct Registry {
    clients: DashMap<ClientId, ClientRecord>,
    // Incremented before use, so zero is never emitted and IDs are strictly
    // increasing for the life of the process.
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next ID and insert a record for `name` seen at `addr`.
    pub fn create(&self, name: &str, addr: SocketAddr, now: TimestampSecs) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.clients.insert(
            id,
            ClientRecord {
                id,
                name: name.to_string(),
                addr,
                last_heartbeat: now,
            },
        );
        id
    }

    /// Remove `id`. Returns false when it was not present.
    pub fn remove(&self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    /// Point lookup, non-mutating.
    pub fn lookup(&self, id: ClientId) -> Option<ClientRecord> {
        self.clients.get(&id).map(|rec| rec.clone())
    }

    /// Record a heartbeat for `id`, returning whether the entry exists.
    ///
    /// `last_heartbeat` is monotonic per entry: an out-of-order timestamp is
    /// ignored silently.
    pub fn touch(&self, id: ClientId, now: TimestampSecs) -> bool {
        match self.clients.get_mut(&id) {
            Some(mut rec) => {
                if now >= rec.last_heartbeat {
                    rec.last_heartbeat = now;
                }
                true
            }
            None => false,
        }
    }

    /// Evict every record silent for longer than `timeout_secs`, returning
    /// the eviction count.
    pub fn sweep(&self, now: TimestampSecs, timeout_secs: u64) -> usize {
        let mut evicted = 0;
        self.clients.retain(|id, rec| {
            let live = now.saturating_sub(rec.last_heartbeat) <= timeout_secs;
            if !live {
                evicted += 1;
                debug!(id, "evicting stale client");
            }
            live
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
