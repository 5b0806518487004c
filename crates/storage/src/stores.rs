//! The four stores owned by one node process.

use crate::accounts::AccountStore;
use crate::partition::PartitionStore;
use crate::StorageError;
use std::path::{Path, PathBuf};

/// Which of the two replica slots a replication push targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaSlot {
    First,
    Second,
}

#[derive(Debug)]
pub struct NodeStores {
    pub primary: PartitionStore,
    pub replica1: PartitionStore,
    pub replica2: PartitionStore,
    pub accounts: AccountStore,
}

pub fn primary_path(dir: &Path, port: u16) -> PathBuf {
    dir.join(format!("db_{}.kv", port))
}

pub fn replica_path(dir: &Path, port: u16, slot: ReplicaSlot) -> PathBuf {
    let n = match slot {
        ReplicaSlot::First => 1,
        ReplicaSlot::Second => 2,
    };
    dir.join(format!("replica{}_{}.kv", n, port))
}

pub fn accounts_path(dir: &Path, port: u16) -> PathBuf {
    dir.join(format!("users_{}.kv", port))
}

impl NodeStores {
    /// Open (or create) the stores for the node listening on `port`.
    pub fn open(dir: &Path, port: u16) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            primary: PartitionStore::open(&primary_path(dir, port))?,
            replica1: PartitionStore::open(&replica_path(dir, port, ReplicaSlot::First))?,
            replica2: PartitionStore::open(&replica_path(dir, port, ReplicaSlot::Second))?,
            accounts: AccountStore::open(&accounts_path(dir, port))?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            primary: PartitionStore::in_memory(),
            replica1: PartitionStore::in_memory(),
            replica2: PartitionStore::in_memory(),
            accounts: AccountStore::in_memory(),
        }
    }

    pub fn replica(&self, slot: ReplicaSlot) -> &PartitionStore {
        match slot {
            ReplicaSlot::First => &self.replica1,
            ReplicaSlot::Second => &self.replica2,
        }
    }

    pub fn sync(&self) {
        self.primary.sync();
        self.replica1.sync();
        self.replica2.sync();
        self.accounts.sync();
    }

    /// Drain and stop every flush worker.
    pub fn close(&self) {
        self.primary.close();
        self.replica1.close();
        self.replica2.close();
        self.accounts.close();
    }
}
