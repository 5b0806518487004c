//! Per-process node state shared by every connection and background loop.

use crate::peer_client::PeerClient;
use crate::status::{Command, NodeStatus};
use parking_lot::{Mutex, RwLock};
use ringkv_cache::EvictionCache;
use ringkv_common::RingHash;
use ringkv_ring::{HashRing, RingEntry, RingError};
use ringkv_storage::NodeStores;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Static settings a node is started with.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Advertised address; together with `port` this fixes the ring position.
    pub address: String,
    pub port: u16,
    /// `host:port` of the orchestrator's recovery listener.
    pub recovery_addr: String,
    pub failure_detection_interval: Duration,
    pub replication_interval: Duration,
    pub expiry_sweep_interval: Duration,
}

impl NodeSettings {
    pub fn new(address: impl Into<String>, port: u16, recovery_addr: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            recovery_addr: recovery_addr.into(),
            failure_detection_interval: Duration::from_secs(120),
            replication_interval: Duration::from_secs(300),
            expiry_sweep_interval: Duration::from_millis(1000),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// This node's entry together with the ring it was last given.
#[derive(Debug, Clone)]
pub struct RingView {
    pub me: RingEntry,
    pub ring: HashRing,
}

impl RingView {
    /// `(predecessor, self]`: keys this node accepts writes for.
    pub fn primary_range(&self) -> Result<(RingHash, RingHash), RingError> {
        self.ring.primary_range(&self.me)
    }

    /// Primary range plus the two ranges this node holds replicas of.
    pub fn read_range(&self) -> Result<(RingHash, RingHash), RingError> {
        self.ring.widened_range(&self.me, crate::router::READ_RANGE_STEPS)
    }

    /// Up to two distinct successors, excluding this node.
    pub fn replica_targets(&self) -> Vec<RingEntry> {
        let mut out = Vec::with_capacity(2);
        let Ok(first) = self.ring.successor(&self.me) else {
            return out;
        };
        let second = self.ring.successor(first).ok().cloned();
        for target in std::iter::once(first.clone()).chain(second) {
            if target != self.me && !out.contains(&target) {
                out.push(target);
            }
        }
        out
    }
}

/// Everything a node process shares across tasks.
///
/// Each piece of mutable state sits behind its own lock. None of these locks
/// is ever held across an `.await`.
pub struct NodeContext<P: PeerClient> {
    settings: NodeSettings,
    status: RwLock<NodeStatus>,
    me: RwLock<Option<RingEntry>>,
    ring: RwLock<HashRing>,
    cache: RwLock<Option<Arc<EvictionCache>>>,
    stores: NodeStores,
    peers: Arc<P>,
    shutdown: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: PeerClient> std::fmt::Debug for NodeContext<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("addr", &self.settings.addr())
            .field("status", &*self.status.read())
            .finish_non_exhaustive()
    }
}

impl<P: PeerClient> NodeContext<P> {
    pub fn new(settings: NodeSettings, stores: NodeStores, peers: Arc<P>) -> Self {
        Self {
            settings,
            status: RwLock::new(NodeStatus::Uninitialized),
            me: RwLock::new(None),
            ring: RwLock::new(HashRing::new()),
            cache: RwLock::new(None),
            stores,
            peers,
            shutdown: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn stores(&self) -> &NodeStores {
        &self.stores
    }

    pub fn peers(&self) -> &Arc<P> {
        &self.peers
    }

    // ── Status ──

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    /// Apply `cmd` atomically. Returns the new status, or `None` (leaving the
    /// status untouched) when the command is illegal in the current state.
    pub fn transition(&self, cmd: Command) -> Option<NodeStatus> {
        let mut status = self.status.write();
        let next = status.apply(cmd)?;
        if next != *status {
            tracing::info!("status {} -> {} ({:?})", *status, next, cmd);
        }
        *status = next;
        Some(next)
    }

    /// Run a client write with the status held steady, so LOCK_WRITE, STOP
    /// and SHUTDOWN wait for it to finish. Returns `None` without running
    /// `write` when the node does not accept writes. `write` must not read
    /// the status itself.
    pub fn write_gate<R>(&self, write: impl FnOnce() -> R) -> Option<R> {
        let status = self.status.read();
        if !status.accepts_writes() {
            return None;
        }
        let result = write();
        drop(status);
        Some(result)
    }

    // ── Ring ──

    pub fn me(&self) -> Option<RingEntry> {
        self.me.read().clone()
    }

    pub fn ring(&self) -> HashRing {
        self.ring.read().clone()
    }

    pub fn ring_text(&self) -> String {
        self.ring.read().to_text()
    }

    /// Snapshot of identity and ring; `None` before INIT.
    pub fn view(&self) -> Option<RingView> {
        let me = self.me()?;
        Some(RingView {
            me,
            ring: self.ring(),
        })
    }

    pub fn replace_ring(&self, ring: HashRing) {
        *self.ring.write() = ring;
    }

    // ── Cache ──

    pub fn cache(&self) -> Option<Arc<EvictionCache>> {
        self.cache.read().clone()
    }

    /// Install identity, ring and cache as delivered by INIT.
    pub fn install(&self, me: RingEntry, ring: HashRing, cache: EvictionCache) {
        *self.me.write() = Some(me);
        *self.ring.write() = ring;
        *self.cache.write() = Some(Arc::new(cache));
    }

    pub fn invalidate_cached(&self, keys: &[String]) {
        if let Some(cache) = self.cache() {
            for key in keys {
                cache.invalidate(key);
            }
        }
    }

    // ── Lifecycle ──

    /// Token cancelled when the node shuts down. Loops take child tokens.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn track_loop(&self, handle: JoinHandle<()>) {
        self.loops.lock().push(handle);
    }

    /// Cancel every loop and connection task.
    pub fn begin_shutdown(&self) {
        self.transition(Command::Shutdown);
        self.shutdown.cancel();
    }

    /// Wait for background loops to exit, then drain the flush writers.
    pub async fn finish_shutdown(&self) {
        let handles: Vec<_> = self.loops.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.stores.close();
        tracing::info!("node {} shut down", self.settings.addr());
    }
}
