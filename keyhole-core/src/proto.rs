//! Wire codec for the keyhole control and peer protocols.
//!
//! Every message is a single UDP datagram of printable text, at most
//! [`MAX_DATAGRAM`] bytes. Four families share the socket:
//!
//! * client -> server commands (`login`, `logout`, `get`, `punch`) and the
//!   `heartbeat` keepalive, all space separated;
//! * server -> client responses (`<cmd> OK [data]` / `<cmd> FAIL <message>`),
//!   the fixed heartbeat reply marker, and the `getpunch <ip>:<port>`
//!   introduction;
//! * peer -> peer punch packets carrying the sender identity between
//!   sentinels (`#hello#<id>#<name>#` / `$world$<id>$<name>$`);
//! * peer -> peer chat, `<sender-id>|<text>`.
//!
//! Classification is purely by prefix/token inspection. A datagram matching
//! no classifier is malformed; callers log and drop it, never re-interpret.
//! This module is pure: no sockets, no clocks.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::net::SocketAddr;

use thiserror::Error;

use crate::types::ClientId;
use crate::{Error as CoreError, Result};

/// Upper bound on any encoded datagram (receive buffers are sized to this).
pub const MAX_DATAGRAM: usize = 1024;

pub const CMD_LOGIN: &str = "login";
pub const CMD_LOGOUT: &str = "logout";
pub const CMD_GET: &str = "get";
pub const CMD_PUNCH: &str = "punch";
pub const CMD_HEARTBEAT: &str = "heartbeat";
/// Server -> target introduction carrying the caller's public endpoint.
pub const CMD_INTRODUCE: &str = "getpunch";

pub const RESULT_OK: &str = "OK";
pub const RESULT_FAIL: &str = "FAIL";

/// Fixed heartbeat reply marker. Deliberately carries no ID.
pub const HEARTBEAT_REPLY: &str = "pong";

/// Failure payload for wrong arity or non-integer IDs.
pub const BAD_ARGS: &str = "bad args";

const PUNCH_REQUEST_SENTINEL: char = '#';
const PUNCH_REPLY_SENTINEL: char = '$';
const PUNCH_REQUEST_TAG: &str = "hello";
const PUNCH_REPLY_TAG: &str = "world";
const CHAT_SEPARATOR: char = '|';

/// A parsed client -> server command.
///
/// Heartbeats are not part of this enum: the server classifies them by prefix
/// before command parsing, mirroring their fast-path handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { name: String },
    Logout { id: ClientId },
    Get { id: ClientId },
    Punch { caller: ClientId, target: ClientId },
}

impl Command {
    /// The wire token for this command, used in response echoes.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login { .. } => CMD_LOGIN,
            Command::Logout { .. } => CMD_LOGOUT,
            Command::Get { .. } => CMD_GET,
            Command::Punch { .. } => CMD_PUNCH,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Command::Login { name } => format!("{CMD_LOGIN} {name}"),
            Command::Logout { id } => format!("{CMD_LOGOUT} {id}"),
            Command::Get { id } => format!("{CMD_GET} {id}"),
            Command::Punch { caller, target } => format!("{CMD_PUNCH} {caller} {target}"),
        }
    }
}

/// Why a datagram failed to parse as a command.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Known command token with the wrong arity or a non-integer ID. The
    /// server answers these with `<cmd> FAIL bad args`.
    #[error("bad arguments for {cmd}")]
    BadArgs { cmd: &'static str },
    /// Leading token matches no command; the datagram is dropped.
    #[error("unknown command")]
    Unknown,
}

/// Parse a client -> server command datagram.
pub fn parse_command(raw: &str) -> core::result::Result<Command, CommandError> {
    let tokens: Vec<&str> = raw.split(' ').collect();
    let (cmd, args) = match tokens.split_first() {
        Some((cmd, args)) => (*cmd, args),
        None => return Err(CommandError::Unknown),
    };
    match cmd {
        CMD_LOGIN => match args {
            [name] if !name.is_empty() => Ok(Command::Login {
                name: (*name).to_string(),
            }),
            _ => Err(CommandError::BadArgs { cmd: CMD_LOGIN }),
        },
        CMD_LOGOUT => parse_id_arg(args, CMD_LOGOUT).map(|id| Command::Logout { id }),
        CMD_GET => parse_id_arg(args, CMD_GET).map(|id| Command::Get { id }),
        CMD_PUNCH => match args {
            [caller, target] => match (caller.parse(), target.parse()) {
                (Ok(caller), Ok(target)) => Ok(Command::Punch { caller, target }),
                _ => Err(CommandError::BadArgs { cmd: CMD_PUNCH }),
            },
            _ => Err(CommandError::BadArgs { cmd: CMD_PUNCH }),
        },
        _ => Err(CommandError::Unknown),
    }
}

fn parse_id_arg(
    args: &[&str],
    cmd: &'static str,
) -> core::result::Result<ClientId, CommandError> {
    match args {
        [id] => id.parse().map_err(|_| CommandError::BadArgs { cmd }),
        _ => Err(CommandError::BadArgs { cmd }),
    }
}

/// A server -> client response to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Echo of the command token this responds to.
    pub cmd: String,
    /// `OK` vs `FAIL`.
    pub ok: bool,
    /// Success payload or failure message; may be empty, may contain spaces.
    pub data: String,
}

impl Response {
    pub fn ok(cmd: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ok: true,
            data: data.into(),
        }
    }

    pub fn fail(cmd: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ok: false,
            data: data.into(),
        }
    }

    pub fn bad_args(cmd: impl Into<String>) -> Self {
        Self::fail(cmd, BAD_ARGS)
    }

    pub fn not_exists(cmd: impl Into<String>, id: ClientId) -> Self {
        Self::fail(cmd, format!("{id} is not exists"))
    }

    pub fn encode(&self) -> String {
        let result = if self.ok { RESULT_OK } else { RESULT_FAIL };
        if self.data.is_empty() {
            format!("{} {}", self.cmd, result)
        } else {
            format!("{} {} {}", self.cmd, result, self.data)
        }
    }

    /// Parse a response datagram.
    ///
    /// Splits on at most the first two spaces so the data field keeps any
    /// embedded spaces verbatim.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(3, ' ');
        let cmd = parts
            .next()
            .filter(|cmd| !cmd.is_empty())
            .ok_or_else(|| CoreError::protocol("empty response"))?;
        let result = parts
            .next()
            .ok_or_else(|| CoreError::protocol(format!("response without result token: {raw}")))?;
        let ok = match result {
            RESULT_OK => true,
            RESULT_FAIL => false,
            other => {
                return Err(CoreError::protocol(format!("bad result token: {other}")));
            }
        };
        Ok(Self {
            cmd: cmd.to_string(),
            ok,
            data: parts.next().unwrap_or("").to_string(),
        })
    }
}

/// Encode the server -> target introduction for `caller`'s observed endpoint.
pub fn introduction(caller: SocketAddr) -> String {
    format!("{CMD_INTRODUCE} {caller}")
}

/// Classify an introduction datagram, yielding the endpoint to punch back to.
pub fn parse_introduction(raw: &str) -> Option<SocketAddr> {
    let (cmd, addr) = raw.split_once(' ')?;
    if cmd != CMD_INTRODUCE || addr.contains(' ') {
        return None;
    }
    addr.parse().ok()
}

/// Encode a heartbeat for a logged-in client.
pub fn heartbeat(id: ClientId) -> String {
    format!("{CMD_HEARTBEAT} {id}")
}

/// True when the datagram's leading token is the heartbeat command.
pub fn is_heartbeat(raw: &str) -> bool {
    raw.split(' ').next() == Some(CMD_HEARTBEAT)
}

/// Extract the client ID from a heartbeat datagram, if well formed.
pub fn parse_heartbeat(raw: &str) -> Option<ClientId> {
    let rest = raw.strip_prefix(CMD_HEARTBEAT)?.strip_prefix(' ')?;
    rest.parse().ok().filter(|id| *id != 0)
}

pub fn is_heartbeat_reply(raw: &str) -> bool {
    raw == HEARTBEAT_REPLY
}

/// The `{id, name}` pair piggy-backed on punch packets.
///
/// One successful punch round teaches each side the other's identity, so chat
/// can be labeled by name instead of raw endpoint. The declared ID is not
/// verified against the source endpoint; impersonation is possible and
/// accepted, this protocol is not a trust boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub id: ClientId,
    pub name: String,
}

/// Encode a punch request (active side opening packet).
pub fn punch_request(identity: &PeerIdentity) -> String {
    let s = PUNCH_REQUEST_SENTINEL;
    format!("{s}{PUNCH_REQUEST_TAG}{s}{}{s}{}{s}", identity.id, identity.name)
}

/// Encode a punch reply (passive side answer).
pub fn punch_reply(identity: &PeerIdentity) -> String {
    let s = PUNCH_REPLY_SENTINEL;
    format!("{s}{PUNCH_REPLY_TAG}{s}{}{s}{}{s}", identity.id, identity.name)
}

pub fn parse_punch_request(raw: &str) -> Option<PeerIdentity> {
    parse_punch(raw, PUNCH_REQUEST_SENTINEL, PUNCH_REQUEST_TAG)
}

pub fn parse_punch_reply(raw: &str) -> Option<PeerIdentity> {
    parse_punch(raw, PUNCH_REPLY_SENTINEL, PUNCH_REPLY_TAG)
}

// Strip the leading and trailing sentinel, then split on the sentinel into a
// three-element list: tag, decimal ID, name.
fn parse_punch(raw: &str, sentinel: char, tag: &str) -> Option<PeerIdentity> {
    let body = raw.strip_prefix(sentinel)?.strip_suffix(sentinel)?;
    let mut parts = body.splitn(3, sentinel);
    let (found_tag, id, name) = (parts.next()?, parts.next()?, parts.next()?);
    if found_tag != tag || name.is_empty() {
        return None;
    }
    let id: ClientId = id.parse().ok()?;
    if id == 0 {
        return None;
    }
    Some(PeerIdentity {
        id,
        name: name.to_string(),
    })
}

/// Encode a chat datagram from `sender`.
pub fn chat(sender: ClientId, text: &str) -> String {
    format!("{sender}{CHAT_SEPARATOR}{text}")
}

/// Parse a chat datagram into `(sender-id, text)`.
///
/// Splits on the first separator only, so the text may itself contain pipes.
pub fn parse_chat(raw: &str) -> Option<(ClientId, &str)> {
    let (id, text) = raw.split_once(CHAT_SEPARATOR)?;
    let id: ClientId = id.parse().ok()?;
    if id == 0 {
        return None;
    }
    Some((id, text))
}
