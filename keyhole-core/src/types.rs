#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// Logical client identifier allocated by the rendezvous server.
///
/// Zero is reserved: a client process with `id == 0` is not logged in, and the
/// server-side allocator never emits it.
pub type ClientId = u64;

/// Seconds since the Unix epoch, the granularity used for heartbeat bookkeeping.
pub type TimestampSecs = u64;

/// Current wall-clock time in whole seconds.
pub fn unix_now() -> TimestampSecs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Resolve a `host:port` string to a single socket address.
///
/// Picks the resolver's first answer. Resolution failure is fatal at startup,
/// so the error carries the offending input.
pub fn resolve_addr(input: &str) -> Result<SocketAddr> {
    input
        .to_socket_addrs()
        .map_err(|e| Error::addr(format!("{input}: {e}")))?
        .next()
        .ok_or_else(|| Error::addr(format!("{input}: no usable address")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_numeric_addr() {
        let addr = resolve_addr("127.0.0.1:10086").unwrap();
        assert_eq!(addr.port(), 10086);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn resolve_rejects_garbage() {
        assert!(resolve_addr("not-an-addr").is_err());
    }
}
