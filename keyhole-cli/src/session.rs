//! Session controller: owns the client identity and drives the
//! login -> get -> punch -> send sequence against the rendezvous server.
//!
//! The controller is strictly request/response: one outstanding command, one
//! correlation channel, one bounded timeout. There is deliberately no
//! pipelining and no per-request ID.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use keyhole_core::proto::{self, Command, PeerIdentity, Response};
use keyhole_core::types::resolve_addr;
use keyhole_core::{ClientConfig, ClientId};
use keyhole_transport::punch::{PunchConfig, PunchError, Puncher};
use keyhole_transport::{Transport, UdpPool};

use crate::mux::{ClientMux, PeerDirectory, PeerInfo};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not login")]
    NotLoggedIn,
    #[error("already login as id {0}")]
    AlreadyLoggedIn(ClientId),
    #[error("recv server response timeout")]
    Timeout,
    #[error("{cmd} rejected: {msg}")]
    Rejected { cmd: String, msg: String },
    #[error("bad response data: {0}")]
    BadResponse(String),
    #[error("peer {0} unknown, punch it first")]
    UnknownPeer(ClientId),
    #[error("no addr for peer {0}, run get first")]
    NoEndpoint(ClientId),
    #[error("chat line too long: {0} bytes")]
    ChatTooLong(usize),
    #[error(transparent)]
    Punch(#[from] PunchError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Session {
    config: ClientConfig,
    transport: Transport,
    server_addr: SocketAddr,
    /// Zero means not logged in; at most one identity per process.
    id: AtomicU64,
    name: Mutex<String>,
    /// Endpoint returned by the most recent `get` per peer ID.
    targets: DashMap<ClientId, SocketAddr>,
    puncher: Arc<Puncher>,
    peers: Arc<PeerDirectory>,
    /// Single-consumer end of the response correlation channel.
    resp_rx: tokio::sync::Mutex<mpsc::Receiver<Response>>,
    heartbeat_started: AtomicBool,
}

impl Session {
    /// Bind the dual-purpose socket, start the receive loop and the passive
    /// punch consumer, and hand back the receiver feeding the output sink.
    pub async fn connect(
        config: ClientConfig,
    ) -> keyhole_core::Result<(Arc<Self>, mpsc::Receiver<String>)> {
        let laddr = resolve_addr(&config.laddr)?;
        let server_addr = resolve_addr(&config.raddr)?;

        let pool = UdpPool::bind(laddr).await?;
        let local = pool.local_addr()?;

        let (resp_tx, resp_rx) = mpsc::channel(8);
        let (intro_tx, mut intro_rx) = mpsc::channel(16);
        let (output_tx, output_rx) = mpsc::channel(64);

        let punch_config = PunchConfig {
            burst: config.punch_burst,
            interval: config.punch_interval(),
        };
        let puncher = Arc::new(Puncher::new(pool.clone(), punch_config));
        let peers: Arc<PeerDirectory> = Arc::new(DashMap::new());

        let mux = Arc::new(ClientMux::new(
            server_addr,
            resp_tx,
            intro_tx,
            output_tx,
            puncher.clone(),
            peers.clone(),
        ));
        let transport = Transport::start(pool, mux);
        info!(%local, %server_addr, "client socket bound");

        let session = Arc::new(Self {
            config,
            transport,
            server_addr,
            id: AtomicU64::new(0),
            name: Mutex::new(String::new()),
            targets: DashMap::new(),
            puncher,
            peers,
            resp_rx: tokio::sync::Mutex::new(resp_rx),
            heartbeat_started: AtomicBool::new(false),
        });

        // Passive punch consumer: each introduction triggers a reply burst.
        let consumer = session.clone();
        tokio::spawn(async move {
            while let Some(addr) = intro_rx.recv().await {
                let identity = consumer.identity();
                consumer.puncher.punch_back(addr, &identity).await;
            }
        });

        Ok((session, output_rx))
    }

    /// Log in under `name`; on success stores the allocated ID and starts
    /// the heartbeat ticker (first login only).
    pub async fn login(self: &Arc<Self>, name: &str) -> Result<ClientId, SessionError> {
        let current = self.id.load(Ordering::Relaxed);
        if current != 0 {
            return Err(SessionError::AlreadyLoggedIn(current));
        }
        let resp = self
            .request(Command::Login {
                name: name.to_string(),
            })
            .await?;
        let resp = Self::accepted(resp)?;
        let id: ClientId = resp
            .data
            .parse()
            .ok()
            .filter(|id| *id != 0)
            .ok_or_else(|| SessionError::BadResponse(resp.data.clone()))?;
        self.id.store(id, Ordering::Relaxed);
        *self.name.lock() = name.to_string();
        self.start_heartbeat();
        info!(id, name, "logged in");
        Ok(id)
    }

    /// Log out the current identity, clearing the ID and name.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let id = self.id.load(Ordering::Relaxed);
        if id == 0 {
            return Err(SessionError::NotLoggedIn);
        }
        let resp = self.request(Command::Logout { id }).await?;
        Self::accepted(resp)?;
        self.id.store(0, Ordering::Relaxed);
        self.name.lock().clear();
        info!(id, "logged out");
        Ok(())
    }

    /// Ask the server for `peer`'s public endpoint, caching it and
    /// pre-registering the active punch entry for a later `punch`.
    pub async fn get(&self, peer: ClientId) -> Result<SocketAddr, SessionError> {
        if self.id.load(Ordering::Relaxed) == 0 {
            return Err(SessionError::NotLoggedIn);
        }
        let resp = self.request(Command::Get { id: peer }).await?;
        let resp = Self::accepted(resp)?;
        let addr: SocketAddr = resp
            .data
            .parse()
            .map_err(|_| SessionError::BadResponse(resp.data.clone()))?;
        self.targets.insert(peer, addr);
        self.puncher.active.register(addr);
        Ok(addr)
    }

    /// Punch toward `peer`: ask the server to introduce us, then run the
    /// active burst. Requires a prior successful `get` for the peer.
    pub async fn punch(&self, peer: ClientId) -> Result<SocketAddr, SessionError> {
        let id = self.id.load(Ordering::Relaxed);
        if id == 0 {
            return Err(SessionError::NotLoggedIn);
        }
        let addr = self
            .targets
            .get(&peer)
            .map(|entry| *entry)
            .ok_or(SessionError::NoEndpoint(peer))?;
        let resp = self
            .request(Command::Punch {
                caller: id,
                target: peer,
            })
            .await?;
        Self::accepted(resp)?;
        self.puncher.punch_out(addr, &self.identity()).await?;
        Ok(addr)
    }

    /// Send one chat line to a peer learned through punching.
    pub async fn send_chat(&self, peer: ClientId, text: &str) -> Result<(), SessionError> {
        let id = self.id.load(Ordering::Relaxed);
        if id == 0 {
            return Err(SessionError::NotLoggedIn);
        }
        let info = self
            .peers
            .get(&peer)
            .map(|p| p.clone())
            .ok_or(SessionError::UnknownPeer(peer))?;
        let datagram = proto::chat(id, text);
        if datagram.len() > proto::MAX_DATAGRAM {
            return Err(SessionError::ChatTooLong(datagram.len()));
        }
        self.transport.send(info.addr, datagram.as_bytes()).await?;
        Ok(())
    }

    /// Execute one input line, returning the hint for the output sink.
    ///
    /// Lines starting with `#` are control commands (`#login <name>`,
    /// `#logout`, `#get <id>`, `#punch <id>`); anything else is chat in the
    /// form `<peer-id> <text>`.
    pub async fn exec_line(self: &Arc<Self>, line: &str) -> String {
        if let Some(ctrl) = line.strip_prefix('#') {
            return self.exec_control(ctrl).await;
        }
        let Some((id, text)) = line.split_once(' ') else {
            return "chat needs: <peer-id> <text>".to_string();
        };
        let Ok(id) = id.parse::<ClientId>() else {
            return format!("bad peer id: {id}");
        };
        match self.send_chat(id, text).await {
            Ok(()) => format!("[me -> {id}] {text}"),
            Err(e) => format!("send fail: {e}"),
        }
    }

    async fn exec_control(self: &Arc<Self>, input: &str) -> String {
        let mut parts = input.split_whitespace();
        let Some(cmd) = parts.next() else {
            return "bad input".to_string();
        };
        let args: Vec<&str> = parts.collect();
        match cmd {
            "login" => match args.as_slice() {
                [name] => match self.login(name).await {
                    Ok(id) => format!("login success, ID: {id}"),
                    Err(e) => format!("login fail: {e}"),
                },
                _ => "usage: #login <name>".to_string(),
            },
            "logout" => {
                if !args.is_empty() {
                    return "usage: #logout".to_string();
                }
                match self.logout().await {
                    Ok(()) => "logout success".to_string(),
                    Err(e) => format!("logout fail: {e}"),
                }
            }
            "get" => match Self::id_arg(&args) {
                Some(id) => match self.get(id).await {
                    Ok(addr) => format!("get {id} addr success: {addr}"),
                    Err(e) => format!("get fail: {e}"),
                },
                None => "usage: #get <id>".to_string(),
            },
            "punch" => match Self::id_arg(&args) {
                Some(id) => match self.punch(id).await {
                    Ok(addr) => format!("punch {id} success, direct path to {addr}"),
                    Err(e) => format!("punch fail: {e}"),
                },
                None => "usage: #punch <id>".to_string(),
            },
            other => format!("unknown command: #{other}"),
        }
    }

    fn id_arg(args: &[&str]) -> Option<ClientId> {
        match args {
            [id] => id.parse().ok(),
            _ => None,
        }
    }

    /// Identity piggy-backed on punch packets.
    fn identity(&self) -> PeerIdentity {
        PeerIdentity {
            id: self.id.load(Ordering::Relaxed),
            name: self.name.lock().clone(),
        }
    }

    // One command in flight: send, then wait on the correlation channel
    // until the reply or the deadline. Anything still queued from an earlier
    // timed-out command is discarded first.
    async fn request(&self, cmd: Command) -> Result<Response, SessionError> {
        let mut rx = self.resp_rx.lock().await;
        while let Ok(stale) = rx.try_recv() {
            debug!(cmd = %stale.cmd, "discarding stale response");
        }
        self.transport
            .send(self.server_addr, cmd.encode().as_bytes())
            .await?;
        match timeout(self.config.reply_timeout(), rx.recv()).await {
            Ok(Some(resp)) => Ok(resp),
            Ok(None) => Err(SessionError::Timeout),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    fn accepted(resp: Response) -> Result<Response, SessionError> {
        if resp.ok {
            Ok(resp)
        } else {
            Err(SessionError::Rejected {
                cmd: resp.cmd,
                msg: resp.data,
            })
        }
    }

    /// At most one ticker per process lifetime; a re-login after logout
    /// reuses it. The ticker goes quiet while logged out.
    fn start_heartbeat(self: &Arc<Self>) {
        if self.heartbeat_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let session = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(session.config.heartbeat_interval());
            loop {
                ticker.tick().await;
                let id = session.id.load(Ordering::Relaxed);
                if id == 0 {
                    continue;
                }
                if let Err(e) = session
                    .transport
                    .send(session.server_addr, proto::heartbeat(id).as_bytes())
                    .await
                {
                    warn!("heartbeat send failed: {e}");
                }
            }
        });
    }

    pub fn current_id(&self) -> ClientId {
        self.id.load(Ordering::Relaxed)
    }

    /// Directory entry learned from a punch round, if any.
    pub fn known_peer(&self, id: ClientId) -> Option<PeerInfo> {
        self.peers.get(&id).map(|p| p.clone())
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }
}
