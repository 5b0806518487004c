//! Background snapshot flushing.
//!
//! Stores hand a full copy of their contents to a [`SnapshotWriter`] after
//! every mutation. A single dedicated thread writes them out; when several
//! snapshots queue up, only the newest is written. Callers never block on
//! disk I/O.

use crate::snapshot::write_snapshot;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::JoinHandle;

enum FlushJob<T> {
    Snapshot(Vec<T>),
    /// Ack once everything queued before it is on disk.
    Barrier(SyncSender<()>),
    Stop,
}

/// Single-worker flusher for one snapshot file.
pub struct SnapshotWriter<T: Serialize + Send + 'static> {
    path: PathBuf,
    tx: Sender<FlushJob<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Serialize + Send + 'static> std::fmt::Debug for SnapshotWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWriter")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<T: Serialize + Send + 'static> SnapshotWriter<T> {
    pub fn spawn(path: &Path) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let worker_path = path.to_path_buf();
        let name = format!(
            "flush-{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || run_worker(worker_path, rx))?;
        Ok(Self {
            path: path.to_path_buf(),
            tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a full snapshot. Never blocks.
    pub fn submit(&self, entries: Vec<T>) {
        if self.tx.send(FlushJob::Snapshot(entries)).is_err() {
            tracing::warn!("flush worker for {:?} is gone; snapshot dropped", self.path);
        }
    }

    /// Block until every snapshot submitted so far has been written.
    pub fn sync(&self) {
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if self.tx.send(FlushJob::Barrier(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Write any pending snapshot and stop the worker thread.
    pub fn close(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        let _ = self.tx.send(FlushJob::Stop);
        if handle.join().is_err() {
            tracing::warn!("flush worker for {:?} panicked", self.path);
        }
    }
}

impl<T: Serialize + Send + 'static> Drop for SnapshotWriter<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn flush<T: Serialize>(path: &Path, entries: Option<Vec<T>>) {
    let Some(entries) = entries else {
        return;
    };
    let m = ringkv_metrics::metrics();
    match write_snapshot(path, &entries) {
        Ok(()) => {
            m.snapshot_flushes.inc();
            tracing::debug!("flushed {} entries to {:?}", entries.len(), path);
        }
        Err(e) => {
            m.snapshot_flush_failures.inc();
            tracing::warn!("snapshot flush to {:?} failed: {}", path, e);
        }
    }
}

fn run_worker<T: Serialize>(path: PathBuf, rx: Receiver<FlushJob<T>>) {
    let mut pending: Option<Vec<T>> = None;

    while let Ok(job) = rx.recv() {
        let mut next = Some(job);
        while let Some(job) = next.take() {
            match job {
                FlushJob::Snapshot(entries) => {
                    pending = Some(entries);
                    next = rx.try_recv().ok();
                }
                FlushJob::Barrier(ack) => {
                    flush(&path, pending.take());
                    let _ = ack.send(());
                }
                FlushJob::Stop => {
                    flush(&path, pending.take());
                    return;
                }
            }
        }
        flush(&path, pending.take());
    }

    flush(&path, pending.take());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PartitionRecord;
    use crate::snapshot::read_snapshot;
    use tempfile::TempDir;

    #[test]
    fn test_latest_snapshot_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.kv");
        let writer = SnapshotWriter::spawn(&path).unwrap();

        for n in 1..=20 {
            let entries = (0..n)
                .map(|i| PartitionRecord::new(format!("k{}", i), "v", "o"))
                .collect();
            writer.submit(entries);
        }
        writer.sync();

        let loaded: Vec<PartitionRecord> = read_snapshot(&path).unwrap();
        assert_eq!(loaded.len(), 20);
    }

    #[test]
    fn test_close_drains_pending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.kv");
        {
            let writer = SnapshotWriter::spawn(&path).unwrap();
            writer.submit(vec![PartitionRecord::new("a", "1", "o")]);
            writer.close();
            // Second close is a no-op.
            writer.close();
        }
        let loaded: Vec<PartitionRecord> = read_snapshot(&path).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_flush_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("db.kv");
        let writer: SnapshotWriter<PartitionRecord> = SnapshotWriter::spawn(&path).unwrap();
        writer.submit(vec![PartitionRecord::new("a", "1", "o")]);
        writer.sync();
        writer.submit(vec![]);
        writer.sync();
        assert!(!path.exists());
    }
}
