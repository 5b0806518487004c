//! Removal of records whose expiry time has passed.

use crate::context::NodeContext;
use crate::peer_client::PeerClient;
use crate::router::now;
use chrono::NaiveDateTime;
use ringkv_storage::ReplicaSlot;
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant};
use tokio_util::sync::CancellationToken;

pub fn spawn_expiry_sweep<P: PeerClient>(
    ctx: Arc<NodeContext<P>>,
    period: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    sweep_expired(&ctx, now());
                }
            }
        }
        tracing::debug!("expiry sweep stopped");
    })
}

/// Drop expired records from every store and evict expired primary keys
/// from the cache. Returns the primary keys removed.
pub fn sweep_expired<P: PeerClient>(ctx: &NodeContext<P>, now: NaiveDateTime) -> Vec<String> {
    let stores = ctx.stores();
    let removed = stores.primary.remove_expired(now);
    ctx.invalidate_cached(&removed);

    let replica_removed = stores.replica(ReplicaSlot::First).remove_expired(now).len()
        + stores.replica(ReplicaSlot::Second).remove_expired(now).len();

    let total = removed.len() + replica_removed;
    if total > 0 {
        ringkv_metrics::metrics().records_expired.inc_by(total as u64);
        tracing::debug!("expired {} records ({} primary)", total, removed.len());
    }
    removed
}
