//! Abstraction over node-to-node and node-to-orchestrator calls.
//!
//! Concrete implementation lives in `ringkv-net::peer_client`.

use ringkv_proto::StatusType;
use ringkv_ring::RingEntry;
use ringkv_storage::PartitionRecord;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("timeout")]
    Timeout,
    #[error("connection closed by peer")]
    Closed,
    #[error("unexpected reply {got} (expected {expected})")]
    UnexpectedReply {
        expected: StatusType,
        got: StatusType,
    },
}

/// Outbound calls a node makes on its own initiative.
///
/// Same pattern as the orchestrator's `NodeCommander`: a trait in the
/// domain crate with a TCP implementation in the `net` crate.
#[async_trait::async_trait]
pub trait PeerClient: Send + Sync + 'static {
    /// Liveness probe on a fresh connection: IDENTIFY, PING, expect PONG.
    async fn ping(&self, target: &RingEntry) -> Result<(), PeerError>;

    /// Bulk upsert of records on `target`.
    async fn move_data(
        &self,
        target: &RingEntry,
        records: &[PartitionRecord],
    ) -> Result<(), PeerError>;

    /// Replace one of `target`'s replica slots with `records`.
    async fn replicate(
        &self,
        target: &RingEntry,
        source: &RingEntry,
        records: &[PartitionRecord],
    ) -> Result<(), PeerError>;

    /// Propagate a new account.
    async fn add_user(
        &self,
        target: &RingEntry,
        username: &str,
        password: &str,
    ) -> Result<(), PeerError>;

    /// Tell the orchestrator's recovery listener that `dead` stopped answering.
    async fn report_dead(&self, recovery_addr: &str, dead: &RingEntry) -> Result<(), PeerError>;
}
