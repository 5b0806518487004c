//! Record formats for the partition and account stores.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One stored key in a partition or replica slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionRecord {
    pub key: String,
    pub value: String,
    /// Username that created the key. Only this user may read, update or
    /// delete it.
    pub owner: String,
    /// Local wall-clock instant after which the record is dead.
    #[serde(default)]
    pub expires_at: Option<NaiveDateTime>,
}

impl PartitionRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            owner: owner.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: Option<NaiveDateTime>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// True once `now` has reached the expiry instant.
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

/// A registered user. The password is kept only as a SHA-1 hex digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountRecord {
    pub username: String,
    pub password_digest: String,
}
