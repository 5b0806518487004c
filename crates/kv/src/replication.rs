//! Periodic push of the primary store to the two successors.

use crate::context::NodeContext;
use crate::peer_client::PeerClient;
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant};
use tokio_util::sync::CancellationToken;

pub fn spawn_replication<P: PeerClient>(
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
                    replicate_once(&ctx).await;
                }
            }
        }
        tracing::debug!("replication loop stopped");
    })
}

/// Push the full primary contents to each replica target. Returns the
/// number of successful pushes. A failed push does not affect the other.
pub async fn replicate_once<P: PeerClient>(ctx: &NodeContext<P>) -> usize {
    let Some(view) = ctx.view() else {
        return 0;
    };
    let records = ctx.stores().primary.records();
    if records.is_empty() {
        return 0;
    }

    let m = ringkv_metrics::metrics();
    let mut pushed = 0;
    for target in view.replica_targets() {
        match ctx.peers().replicate(&target, &view.me, &records).await {
            Ok(()) => {
                m.replication_pushes.inc();
                pushed += 1;
                tracing::debug!("replicated {} records to {}", records.len(), target);
            }
            Err(e) => {
                m.replication_failures.inc();
                tracing::warn!("replication to {} failed: {}", target, e);
            }
        }
    }
    pushed
}
