//! User accounts, persisted like partitions.

use crate::record::AccountRecord;
use crate::snapshot::read_snapshot;
use crate::writer::SnapshotWriter;
use crate::StorageError;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::Path;

/// Lowercase hex SHA-1 of the password bytes.
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha1::digest(password.as_bytes()))
}

#[derive(Debug)]
pub struct AccountStore {
    accounts: RwLock<HashMap<String, AccountRecord>>,
    writer: Option<SnapshotWriter<AccountRecord>>,
}

impl AccountStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let loaded: Vec<AccountRecord> = read_snapshot(path)?;
        let accounts: HashMap<_, _> = loaded
            .into_iter()
            .map(|a| (a.username.clone(), a))
            .collect();
        tracing::info!("account store {:?} opened with {} users", path, accounts.len());
        Ok(Self {
            accounts: RwLock::new(accounts),
            writer: Some(SnapshotWriter::spawn(path)?),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            writer: None,
        }
    }

    pub fn exists(&self, username: &str) -> bool {
        self.accounts.read().contains_key(username)
    }

    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        self.accounts
            .read()
            .get(username)
            .map(|a| a.password_digest == password_digest(password))
            .unwrap_or(false)
    }

    /// Register a user. Returns `false` if the name is taken.
    pub fn put(&self, username: &str, password: &str) -> bool {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(username) {
            return false;
        }
        accounts.insert(
            username.to_string(),
            AccountRecord {
                username: username.to_string(),
                password_digest: password_digest(password),
            },
        );
        if let Some(writer) = &self.writer {
            writer.submit(accounts.values().cloned().collect());
        }
        true
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    pub fn sync(&self) {
        if let Some(writer) = &self.writer {
            writer.sync();
        }
    }

    pub fn close(&self) {
        if let Some(writer) = &self.writer {
            writer.close();
        }
    }
}
