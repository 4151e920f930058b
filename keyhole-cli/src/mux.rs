//! Client-side datagram demultiplexer.
//!
//! One socket carries both server control traffic and peer traffic, so
//! inbound datagrams are classified by source endpoint first. Server traffic
//! splits into heartbeat replies, punch introductions and command responses;
//! peer traffic into punch request/reply packets and chat.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use keyhole_core::proto::{self, PeerIdentity, Response};
use keyhole_core::ClientId;
use keyhole_transport::punch::Puncher;
use keyhole_transport::PacketHandler;

/// What the client knows about a peer after a punch round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub name: String,
    pub addr: SocketAddr,
}

/// Peers learned from punch packet identities, keyed by peer ID. Used to
/// label inbound chat and as the chat send target set.
pub type PeerDirectory = DashMap<ClientId, PeerInfo>;

pub struct ClientMux {
    server_addr: SocketAddr,
    /// Single-producer end of the response correlation channel; the session
    /// controller is the single consumer.
    resp_tx: mpsc::Sender<Response>,
    /// Introductions waiting for the passive punch consumer.
    intro_tx: mpsc::Sender<SocketAddr>,
    /// Rendered lines for the output sink.
    output_tx: mpsc::Sender<String>,
    puncher: Arc<Puncher>,
    peers: Arc<PeerDirectory>,
}

impl ClientMux {
    pub fn new(
        server_addr: SocketAddr,
        resp_tx: mpsc::Sender<Response>,
        intro_tx: mpsc::Sender<SocketAddr>,
        output_tx: mpsc::Sender<String>,
        puncher: Arc<Puncher>,
        peers: Arc<PeerDirectory>,
    ) -> Self {
        Self {
            server_addr,
            resp_tx,
            intro_tx,
            output_tx,
            puncher,
            peers,
        }
    }

    async fn on_server(&self, text: &str) {
        if proto::is_heartbeat_reply(text) {
            trace!("heartbeat reply");
            return;
        }
        if let Some(addr) = proto::parse_introduction(text) {
            debug!(%addr, "introduction received");
            if self.intro_tx.send(addr).await.is_err() {
                warn!("punch consumer gone, introduction dropped");
            }
            return;
        }
        match Response::parse(text) {
            Ok(resp) => {
                if self.resp_tx.send(resp).await.is_err() {
                    warn!("session controller gone, response dropped");
                }
            }
            Err(e) => warn!("malformed server datagram dropped: {e}"),
        }
    }

    async fn on_peer(&self, src: SocketAddr, text: &str) {
        if let Some(identity) = proto::parse_punch_request(text) {
            debug!(%src, id = identity.id, "punch request heard");
            self.learn(identity, src);
            if !self.puncher.passive.mark_done(src) {
                debug!(%src, "punch request from an endpoint nobody introduced");
            }
            return;
        }
        if let Some(identity) = proto::parse_punch_reply(text) {
            debug!(%src, id = identity.id, "punch reply heard, hole is open");
            self.learn(identity, src);
            if !self.puncher.active.mark_done(src) {
                debug!(%src, "punch reply from an endpoint we never punched");
            }
            return;
        }
        if let Some((id, msg)) = proto::parse_chat(text) {
            let label = self
                .peers
                .get(&id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| src.to_string());
            if self
                .output_tx
                .send(format!("[{id} {label}] {msg}"))
                .await
                .is_err()
            {
                warn!("output sink gone, chat line dropped");
            }
            return;
        }
        warn!(%src, "malformed peer datagram dropped: {text}");
    }

    // The declared identity is taken at face value; nothing checks it against
    // the registered owner of the source endpoint, so impersonation is
    // possible. Accepted: this protocol is not a trust boundary.
    fn learn(&self, identity: PeerIdentity, addr: SocketAddr) {
        self.peers.insert(
            identity.id,
            PeerInfo {
                name: identity.name,
                addr,
            },
        );
    }
}

#[async_trait]
impl PacketHandler for ClientMux {
    async fn handle_packet(&self, src: SocketAddr, data: &[u8]) {
        let Ok(text) = std::str::from_utf8(data) else {
            warn!(%src, "non-utf8 datagram dropped");
            return;
        };
        if src == self.server_addr {
            self.on_server(text).await;
        } else {
            self.on_peer(src, text).await;
        }
    }
}
