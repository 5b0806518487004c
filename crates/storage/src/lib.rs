//! Durable stores for ringkv nodes.
//!
//! Every store is a map held in memory behind a lock. After each mutation
//! the full contents are handed to a background [`SnapshotWriter`], which
//! rewrites the store's checksummed snapshot file.

pub mod accounts;
pub mod partition;
pub mod record;
pub mod snapshot;
pub mod stores;
pub mod writer;

pub use accounts::{password_digest, AccountStore};
pub use partition::{OwnerMismatch, PartitionStore};
pub use record::{AccountRecord, PartitionRecord};
pub use snapshot::SnapshotError;
pub use stores::{NodeStores, ReplicaSlot};
pub use writer::SnapshotWriter;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
