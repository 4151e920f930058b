//! Datagram handler for the rendezvous service: classifies inbound traffic,
//! dispatches commands against the registry, and emits responses.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use keyhole_core::proto::{self, Command, CommandError, Response};
use keyhole_core::types::unix_now;
use keyhole_core::ClientId;
use keyhole_transport::{PacketHandler, UdpPool};

use crate::registry::Registry;

/// Stateless command front-end; everything durable lives in the registry.
pub struct RendezvousHandler {
    registry: Arc<Registry>,
    pool: UdpPool,
}

impl RendezvousHandler {
    pub fn new(registry: Arc<Registry>, pool: UdpPool) -> Self {
        Self { registry, pool }
    }

    async fn reply(&self, addr: SocketAddr, response: Response) {
        if let Err(e) = self.pool.send_to(addr, response.encode().as_bytes()).await {
            warn!(%addr, "response send failed: {e}");
        }
    }

    async fn exec(&self, src: SocketAddr, cmd: Command) {
        match cmd {
            Command::Login { name } => {
                let id = self.registry.create(&name, src, unix_now());
                info!(%src, id, name = %name, "client logged in");
                self.reply(src, Response::ok(proto::CMD_LOGIN, id.to_string()))
                    .await;
            }
            Command::Logout { id } => {
                if self.registry.remove(id) {
                    info!(id, "client logged out");
                    self.reply(src, Response::ok(proto::CMD_LOGOUT, "")).await;
                } else {
                    self.reply(src, Response::not_exists(proto::CMD_LOGOUT, id))
                        .await;
                }
            }
            Command::Get { id } => match self.registry.lookup(id) {
                Some(rec) => {
                    self.reply(src, Response::ok(proto::CMD_GET, rec.addr.to_string()))
                        .await;
                }
                None => {
                    self.reply(src, Response::not_exists(proto::CMD_GET, id))
                        .await;
                }
            },
            Command::Punch { caller, target } => self.punch(src, caller, target).await,
        }
    }

    /// Introduce `caller` to `target`: one datagram to the target carrying
    /// the caller's observed endpoint, then the verdict back to the caller.
    /// The server keeps no per-punch state; every punch is independent.
    async fn punch(&self, src: SocketAddr, caller: ClientId, target: ClientId) {
        let Some(caller_rec) = self.registry.lookup(caller) else {
            return self
                .reply(src, Response::not_exists(proto::CMD_PUNCH, caller))
                .await;
        };
        let Some(target_rec) = self.registry.lookup(target) else {
            return self
                .reply(src, Response::not_exists(proto::CMD_PUNCH, target))
                .await;
        };
        let intro = proto::introduction(caller_rec.addr);
        match self.pool.send_to(target_rec.addr, intro.as_bytes()).await {
            Ok(()) => {
                debug!(caller, target, "introduction sent");
                self.reply(src, Response::ok(proto::CMD_PUNCH, "")).await;
            }
            Err(e) => {
                warn!(caller, target, "introduction send failed: {e}");
                self.reply(
                    src,
                    Response::fail(proto::CMD_PUNCH, format!("send punch to {target} fail")),
                )
                .await;
            }
        }
    }
}

#[async_trait]
impl PacketHandler for RendezvousHandler {
    async fn handle_packet(&self, src: SocketAddr, data: &[u8]) {
        let Ok(text) = std::str::from_utf8(data) else {
            warn!(%src, "non-utf8 datagram dropped");
            return;
        };
        // Heartbeats are the hot path: touch and answer before command
        // parsing. The reply is a bare marker; unknown IDs get nothing.
        if proto::is_heartbeat(text) {
            match proto::parse_heartbeat(text) {
                Some(id) if self.registry.touch(id, unix_now()) => {
                    if let Err(e) = self
                        .pool
                        .send_to(src, proto::HEARTBEAT_REPLY.as_bytes())
                        .await
                    {
                        warn!(%src, "heartbeat reply send failed: {e}");
                    }
                }
                Some(id) => debug!(%src, id, "heartbeat for unknown id ignored"),
                None => warn!(%src, "malformed heartbeat dropped: {text}"),
            }
            return;
        }
        match proto::parse_command(text) {
            Ok(cmd) => self.exec(src, cmd).await,
            Err(CommandError::BadArgs { cmd }) => self.reply(src, Response::bad_args(cmd)).await,
            Err(CommandError::Unknown) => warn!(%src, "unknown datagram dropped: {text}"),
        }
    }
}
