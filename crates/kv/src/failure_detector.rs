//! Background liveness probing of ring peers.
//!
//! Each node pings the entries at `2i+1` and `2i+2` of its own ring index.
//! When a target is dead its own targets are probed in the same cycle, so a
//! run of consecutive failures is still fully covered.

use crate::context::NodeContext;
use crate::peer_client::PeerClient;
use ringkv_ring::RingEntry;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Spawn the periodic detector. The first cycle runs one `period` after start.
pub fn spawn_failure_detector<P: PeerClient>(
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
                    detect_failures(&ctx).await;
                }
            }
        }
        tracing::debug!("failure detector stopped");
    })
}

/// One detection cycle. Returns the entries found dead and reported.
pub async fn detect_failures<P: PeerClient>(ctx: &NodeContext<P>) -> Vec<RingEntry> {
    let Some(view) = ctx.view() else {
        return Vec::new();
    };
    let mut queue: VecDeque<RingEntry> = view.ring.ping_targets(&view.me).into();
    let mut visited: HashSet<RingEntry> = queue.iter().cloned().collect();
    visited.insert(view.me.clone());

    let mut dead = Vec::new();
    while let Some(target) = queue.pop_front() {
        match ctx.peers().ping(&target).await {
            Ok(()) => tracing::trace!("{} is alive", target),
            Err(e) => {
                tracing::warn!("{} did not answer PING: {}", target, e);
                for next in view.ring.ping_targets(&target) {
                    if visited.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
                let recovery = &ctx.settings().recovery_addr;
                match ctx.peers().report_dead(recovery, &target).await {
                    Ok(()) => ringkv_metrics::metrics().dead_peers_reported.inc(),
                    Err(e) => tracing::error!(
                        "could not report {} to recovery at {}: {}",
                        target,
                        recovery,
                        e
                    ),
                }
                dead.push(target);
            }
        }
    }
    dead
}
