//! In-memory partition store with background snapshot persistence.
//!
//! Used for the primary partition and for both replica slots. Reads never
//! touch disk; every mutation queues a full snapshot on the store's
//! [`SnapshotWriter`].

use crate::record::PartitionRecord;
use crate::snapshot::read_snapshot;
use crate::writer::SnapshotWriter;
use crate::StorageError;
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use ringkv_common::{hash_key, in_range, RingHash};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;

/// A write refused because a live record under the key belongs to
/// another user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("key '{key}' is owned by {owner}")]
pub struct OwnerMismatch {
    pub key: String,
    pub owner: String,
}

#[derive(Debug)]
pub struct PartitionStore {
    records: RwLock<BTreeMap<String, PartitionRecord>>,
    writer: Option<SnapshotWriter<PartitionRecord>>,
}

impl PartitionStore {
    /// Open the store backed by `path`, loading any existing snapshot.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let loaded: Vec<PartitionRecord> = read_snapshot(path)?;
        let records: BTreeMap<_, _> = loaded.into_iter().map(|r| (r.key.clone(), r)).collect();
        tracing::info!("partition store {:?} opened with {} records", path, records.len());
        Ok(Self {
            records: RwLock::new(records),
            writer: Some(SnapshotWriter::spawn(path)?),
        })
    }

    /// A store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            writer: None,
        }
    }

    fn persist(&self, records: &BTreeMap<String, PartitionRecord>) {
        if let Some(writer) = &self.writer {
            writer.submit(records.values().cloned().collect());
        }
    }

    /// Insert or overwrite. Returns the previous record.
    pub fn put(&self, record: PartitionRecord) -> Option<PartitionRecord> {
        let mut records = self.records.write();
        let old = records.insert(record.key.clone(), record);
        self.persist(&records);
        old
    }

    /// Upsert many records at once. Returns how many were written.
    pub fn put_all(&self, batch: impl IntoIterator<Item = PartitionRecord>) -> usize {
        let mut records = self.records.write();
        let mut n = 0;
        for record in batch {
            records.insert(record.key.clone(), record);
            n += 1;
        }
        if n > 0 {
            self.persist(&records);
        }
        n
    }

    /// Insert only the records whose key is not present. The check and the
    /// insert happen under one write guard. Returns how many were inserted.
    pub fn put_absent(&self, batch: impl IntoIterator<Item = PartitionRecord>) -> usize {
        let mut records = self.records.write();
        let mut n = 0;
        for record in batch {
            if let Entry::Vacant(slot) = records.entry(record.key.clone()) {
                slot.insert(record);
                n += 1;
            }
        }
        if n > 0 {
            self.persist(&records);
        }
        n
    }

    /// Insert or overwrite unless a live record under the key is owned by
    /// someone else. Returns the live record that was replaced, if any.
    pub fn put_if_owner(
        &self,
        record: PartitionRecord,
        now: NaiveDateTime,
    ) -> Result<Option<PartitionRecord>, OwnerMismatch> {
        let mut records = self.records.write();
        if let Some(current) = records.get(&record.key).filter(|r| !r.is_expired(now)) {
            if current.owner != record.owner {
                return Err(OwnerMismatch {
                    key: record.key,
                    owner: current.owner.clone(),
                });
            }
        }
        let old = records
            .insert(record.key.clone(), record)
            .filter(|r| !r.is_expired(now));
        self.persist(&records);
        Ok(old)
    }

    /// Delete `key` if its live record belongs to `owner`. `Ok(None)` means
    /// there was no live record.
    pub fn remove_if_owner(
        &self,
        key: &str,
        owner: &str,
        now: NaiveDateTime,
    ) -> Result<Option<PartitionRecord>, OwnerMismatch> {
        let mut records = self.records.write();
        match records.get(key).filter(|r| !r.is_expired(now)) {
            None => return Ok(None),
            Some(current) if current.owner != owner => {
                return Err(OwnerMismatch {
                    key: key.to_string(),
                    owner: current.owner.clone(),
                })
            }
            Some(_) => {}
        }
        let old = records.remove(key);
        self.persist(&records);
        Ok(old)
    }

    pub fn get(&self, key: &str) -> Option<PartitionRecord> {
        self.records.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }

    /// Delete a key. Returns the removed record.
    pub fn remove(&self, key: &str) -> Option<PartitionRecord> {
        let mut records = self.records.write();
        let old = records.remove(key);
        if old.is_some() {
            self.persist(&records);
        }
        old
    }

    /// Records whose key hash lies in `(lower, upper]`.
    pub fn range_query(&self, lower: &RingHash, upper: &RingHash) -> Vec<PartitionRecord> {
        self.select(|h| in_range(h, lower, upper))
    }

    /// Records whose key hash lies outside `(lower, upper]`.
    pub fn out_of_range_query(&self, lower: &RingHash, upper: &RingHash) -> Vec<PartitionRecord> {
        self.select(|h| !in_range(h, lower, upper))
    }

    fn select(&self, keep: impl Fn(&RingHash) -> bool) -> Vec<PartitionRecord> {
        self.records
            .read()
            .values()
            .filter(|r| keep(&hash_key(&r.key)))
            .cloned()
            .collect()
    }

    /// Delete every record whose key hash lies outside `(lower, upper]`.
    pub fn retain_range(&self, lower: &RingHash, upper: &RingHash) -> Vec<String> {
        let mut records = self.records.write();
        let doomed: Vec<String> = records
            .keys()
            .filter(|k| !in_range(&hash_key(k), lower, upper))
            .cloned()
            .collect();
        for key in &doomed {
            records.remove(key);
        }
        if !doomed.is_empty() {
            self.persist(&records);
        }
        doomed
    }

    /// Replace the whole contents with `batch`.
    pub fn replicate(&self, batch: Vec<PartitionRecord>) {
        let mut records = self.records.write();
        *records = batch.into_iter().map(|r| (r.key.clone(), r)).collect();
        self.persist(&records);
    }

    /// Delete records whose expiry is at or before `now`. Returns their keys.
    pub fn remove_expired(&self, now: NaiveDateTime) -> Vec<String> {
        let mut records = self.records.write();
        let expired: Vec<String> = records
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.key.clone())
            .collect();
        for key in &expired {
            records.remove(key);
        }
        if !expired.is_empty() {
            self.persist(&records);
        }
        expired
    }

    /// Snapshot of every record, in key order.
    pub fn records(&self) -> Vec<PartitionRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Wait until all queued snapshots are on disk.
    pub fn sync(&self) {
        if let Some(writer) = &self.writer {
            writer.sync();
        }
    }

    /// Flush and stop the background writer.
    pub fn close(&self) {
        if let Some(writer) = &self.writer {
            writer.close();
        }
    }
}
