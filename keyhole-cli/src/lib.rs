#![forbid(unsafe_code)]

//! Keyhole peer client library.
//!
//! The binary is a thin line-in/line-out shell; everything interesting lives
//! here: the socket multiplexer ([`mux`]) that classifies inbound datagrams
//! by source endpoint, and the session controller ([`session`]) that drives
//! the rendezvous command sequence and the punch rounds.

pub mod mux;
pub mod session;

pub use mux::{PeerDirectory, PeerInfo};
pub use session::{Session, SessionError};
