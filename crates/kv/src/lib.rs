//! Storage-node logic for ringkv.
//!
//! Provides: the node lifecycle ([`status`]), client request routing with
//! responsibility and ownership checks ([`router`]), orchestrator command
//! handling ([`commands`]), node-to-node requests ([`peer`]) and the three
//! background loops (failure detection, replication, expiry sweep). All
//! outbound calls go through the [`peer_client::PeerClient`] trait so the
//! logic runs unchanged over TCP or in memory.

pub mod chaos;
pub mod commands;
pub mod context;
pub mod convert;
pub mod expiry;
pub mod failure_detector;
pub mod peer;
pub mod peer_client;
pub mod replication;
pub mod router;
pub mod service;
pub mod status;

pub use context::{NodeContext, NodeSettings, RingView};
pub use peer_client::{PeerClient, PeerError};
pub use service::{dispatch, greet, Greeting, Reply};
pub use status::{Command, NodeStatus};
