//! Chaos injection wrapper for [`PeerClient`].
//!
//! [`ChaosPeerClient`] wraps any `P: PeerClient` and injects configurable
//! failures: random errors, per-node outages and latency. Outages are keyed
//! by `address:port`, which is also how the recovery listener is addressed.

use crate::peer_client::{PeerClient, PeerError};
use rand::Rng;
use ringkv_ring::RingEntry;
use ringkv_storage::PartitionRecord;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Probability of returning an error \[0.0, 1.0\].
    pub failure_rate: f64,
    /// Fixed latency injected before forwarding.
    pub latency: Duration,
    /// Random additional latency in \[0, jitter\].
    pub jitter: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

pub struct ChaosPeerClient<P: PeerClient> {
    inner: Arc<P>,
    config: Arc<RwLock<ChaosConfig>>,
    failed: Arc<RwLock<HashSet<String>>>,
}

impl<P: PeerClient> std::fmt::Debug for ChaosPeerClient<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosPeerClient").finish_non_exhaustive()
    }
}

impl<P: PeerClient> ChaosPeerClient<P> {
    pub fn new(inner: P, config: ChaosConfig) -> Self {
        Self::wrap(Arc::new(inner), config)
    }

    pub fn wrap(inner: Arc<P>, config: ChaosConfig) -> Self {
        Self {
            inner,
            config: Arc::new(RwLock::new(config)),
            failed: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn inner(&self) -> &Arc<P> {
        &self.inner
    }

    /// Every call addressed to `addr` fails until [`Self::recover`].
    pub async fn fail(&self, addr: impl Into<String>) {
        self.failed.write().await.insert(addr.into());
    }

    pub async fn recover(&self, addr: &str) {
        self.failed.write().await.remove(addr);
    }

    pub async fn fail_node(&self, node: &RingEntry) {
        self.fail(node.addr()).await;
    }

    pub async fn recover_node(&self, node: &RingEntry) {
        self.recover(&node.addr()).await;
    }

    pub async fn set_failure_rate(&self, rate: f64) {
        self.config.write().await.failure_rate = rate;
    }

    async fn maybe_fail(&self, addr: &str) -> Result<(), PeerError> {
        if self.failed.read().await.contains(addr) {
            return Err(PeerError::RequestFailed(format!(
                "chaos: {} marked as failed",
                addr
            )));
        }

        let (delay, failure_rate) = {
            let config = self.config.read().await;
            let jitter_ms = if config.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
            };
            (
                config.latency + Duration::from_millis(jitter_ms),
                config.failure_rate,
            )
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Err(PeerError::RequestFailed("chaos: random failure".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<P: PeerClient> PeerClient for ChaosPeerClient<P> {
    async fn ping(&self, target: &RingEntry) -> Result<(), PeerError> {
        self.maybe_fail(&target.addr()).await?;
        self.inner.ping(target).await
    }

    async fn move_data(
        &self,
        target: &RingEntry,
        records: &[PartitionRecord],
    ) -> Result<(), PeerError> {
        self.maybe_fail(&target.addr()).await?;
        self.inner.move_data(target, records).await
    }

    async fn replicate(
        &self,
        target: &RingEntry,
        source: &RingEntry,
        records: &[PartitionRecord],
    ) -> Result<(), PeerError> {
        self.maybe_fail(&target.addr()).await?;
        self.inner.replicate(target, source, records).await
    }

    async fn add_user(
        &self,
        target: &RingEntry,
        username: &str,
        password: &str,
    ) -> Result<(), PeerError> {
        self.maybe_fail(&target.addr()).await?;
        self.inner.add_user(target, username, password).await
    }

    async fn report_dead(&self, recovery_addr: &str, dead: &RingEntry) -> Result<(), PeerError> {
        self.maybe_fail(recovery_addr).await?;
        self.inner.report_dead(recovery_addr, dead).await
    }
}

// ────────────────────────── Tests ──────────────────────────
