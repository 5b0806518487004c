//! The ringkv orchestrator (ECS).
//!
//! Owns the authoritative ring and the pool of candidate nodes read from the
//! roster. Launches nodes, drives them through INIT/START/STOP/SHUTDOWN,
//! hands data over on membership changes and replaces nodes reported dead.
//!
//! Node launching and node commands go through the [`launcher::NodeLauncher`]
//! and [`commander::NodeCommander`] traits so the membership logic runs the
//! same against real processes and against in-process test nodes.

pub mod commander;
pub mod launcher;
pub mod operator;
pub mod orchestrator;
pub mod recovery;
pub mod roster;

pub use commander::{NodeCommander, TcpCommander};
pub use launcher::{LaunchError, NodeLauncher, ProcessLauncher, RecoveryEndpoint};
pub use operator::OperatorCommand;
pub use orchestrator::{CacheConfig, Orchestrator, OrchestratorSettings};
pub use recovery::RecoveryInbox;

use ringkv_net::NetError;
use ringkv_ring::RingError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("service is already initialized")]
    AlreadyInitialized,
    #[error("service is not initialized")]
    NotInitialized,
    #[error("cannot start {requested} nodes, only {available} candidates left")]
    NotEnoughCandidates { requested: usize, available: usize },
    #[error("no candidates left in the pool")]
    PoolExhausted,
    #[error("ring is empty")]
    EmptyRing,
    #[error("refusing to remove the last node of the ring")]
    LastNode,
    #[error("none of the launched nodes came up")]
    NothingStarted,
    #[error("{node} did not identify after {attempts} attempt(s): {source}")]
    Unreachable {
        node: String,
        attempts: u32,
        #[source]
        source: NetError,
    },
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error("roster {path}: {reason}")]
    Roster { path: String, reason: String },
}
