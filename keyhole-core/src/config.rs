//! Keyhole configuration handling. Parses a TOML file into strongly-typed
//! structures; command-line flags override file values in the binaries.
//! Defaults match the deployed constants, and the timing knobs exist chiefly
//! so tests can compress time.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::fs;

/// Rendezvous server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP listen port for the rendezvous service.
    pub port: u16,

    /// Seconds without a heartbeat before a client record is evicted.
    pub client_timeout_secs: u64,

    /// Interval between liveness sweeps, in seconds.
    pub sweep_interval_secs: u64,

    /// Optional log file; logs go to stderr when unset.
    pub logfile: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 10086,
            client_timeout_secs: 10,
            sweep_interval_secs: 1,
            logfile: None,
        }
    }
}

impl ServerConfig {
    /// Load a configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let data = fs::read_to_string(&path)?;
        Ok(toml::from_str(&data)?)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Peer client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Local bind address. Its port is simultaneously the source port for
    /// server-bound traffic and the listener peers punch toward; binding
    /// anything else breaks the NAT mapping the server observes.
    pub laddr: String,

    /// Rendezvous server address.
    pub raddr: String,

    /// Punch burst length: datagrams emitted per punch round.
    pub punch_burst: u32,

    /// Milliseconds between consecutive punch datagrams.
    pub punch_interval_ms: u64,

    /// Seconds to wait for a server response before a command times out.
    pub reply_timeout_secs: u64,

    /// Seconds between heartbeats once logged in.
    pub heartbeat_interval_secs: u64,

    /// Optional log file; logs go to stderr when unset.
    pub logfile: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            laddr: "0.0.0.0:10001".to_string(),
            raddr: "127.0.0.1:10086".to_string(),
            punch_burst: 30,
            punch_interval_ms: 100,
            reply_timeout_secs: 15,
            heartbeat_interval_secs: 1,
            logfile: None,
        }
    }
}

impl ClientConfig {
    /// Load a configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let data = fs::read_to_string(&path)?;
        Ok(toml::from_str(&data)?)
    }

    pub fn punch_interval(&self) -> Duration {
        Duration::from_millis(self.punch_interval_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
