#![forbid(unsafe_code)]

//! Core utilities for keyhole.
//!
//! This crate intentionally stays lightweight and pure Rust: the textual wire
//! codec, typed errors, configuration loading, and the small shared types the
//! rest of the workspace builds on. No sockets live here.

pub mod config;
pub mod error;
pub mod proto;
pub mod types;

pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use types::{ClientId, TimestampSecs};
