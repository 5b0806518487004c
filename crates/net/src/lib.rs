//! TCP networking layer for ringkv.
//!
//! Provides:
//! - [`Connection`]: one framed TCP stream with request/response helpers
//! - [`ConnectionPool`]: persistent per-peer connections with timeouts
//! - [`TcpPeerClient`]: implements `PeerClient` over TCP
//! - [`server::serve`]: the node accept loop
//! - [`KvClient`]: routing client for applications and tests

pub mod client;
pub mod connection;
pub mod peer_client;
pub mod pool;
pub mod server;

pub use client::KvClient;
pub use connection::Connection;
pub use peer_client::TcpPeerClient;
pub use pool::ConnectionPool;
pub use server::{serve, spawn_server};

use ringkv_proto::CodecError;
use ringkv_ring::RingError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol violation: {0}")]
    Codec(#[from] CodecError),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection closed by peer")]
    Closed,
    #[error("handshake rejected: {0}")]
    Rejected(String),
    #[error("bad ring in reply: {0}")]
    Ring(#[from] RingError),
    #[error("{0}")]
    Invalid(String),
}
