//! Dead-node reports and the recovery loop.
//!
//! Nodes report unreachable peers to the recovery listener on a fresh
//! connection: an `IDENTIFY` (answered with nothing) followed by one
//! `DEAD_SERVER` frame, answered with `DONE`. Reports accumulate in a
//! [`RecoveryInbox`] until the recovery loop drains it.

use crate::commander::NodeCommander;
use crate::launcher::NodeLauncher;
use crate::orchestrator::Orchestrator;
use parking_lot::Mutex;
use ringkv_kv::convert::parse_dead_server;
use ringkv_net::{Connection, NetError};
use ringkv_proto::{Message, Source, StatusType};
use ringkv_ring::RingEntry;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval_at, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Deduplicated set of reported entries.
#[derive(Debug, Default)]
pub struct RecoveryInbox {
    reported: Mutex<HashSet<RingEntry>>,
}

impl RecoveryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the entry was already pending.
    pub fn report(&self, entry: RingEntry) -> bool {
        self.reported.lock().insert(entry)
    }

    /// Drain every pending report.
    pub fn take(&self) -> Vec<RingEntry> {
        self.reported.lock().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.reported.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accept reporter connections until `cancel` fires.
pub async fn serve_recovery(
    listener: TcpListener,
    inbox: Arc<RecoveryInbox>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let inbox = inbox.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_reporter(stream, peer.to_string(), inbox).await {
                            tracing::warn!("recovery connection from {} dropped: {}", peer, e);
                        }
                    });
                }
                Err(e) => tracing::warn!("recovery accept failed: {}", e),
            }
        }
    }
    tracing::debug!("recovery listener stopped");
}

pub fn spawn_recovery_listener(
    listener: TcpListener,
    inbox: Arc<RecoveryInbox>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(serve_recovery(listener, inbox, cancel))
}

async fn handle_reporter(
    stream: TcpStream,
    peer: String,
    inbox: Arc<RecoveryInbox>,
) -> Result<(), NetError> {
    let mut conn = Connection::new(stream, peer);
    while let Some(msg) = conn.recv().await? {
        match msg.status {
            StatusType::Identify => continue,
            StatusType::DeadServer => {
                let reply = match parse_dead_server(&msg) {
                    Ok(dead) => {
                        tracing::warn!("{} reported dead by {}", dead, conn.peer());
                        inbox.report(dead);
                        Message::text(Source::Ecs, StatusType::Done, "Report received.")
                    }
                    Err(e) => {
                        tracing::warn!("malformed DEAD_SERVER from {}: {}", conn.peer(), e);
                        Message::text(Source::Ecs, StatusType::Fail, "Malformed report.")
                    }
                };
                conn.send(&reply).await?;
            }
            other => {
                let refusal = Message::text(
                    Source::Ecs,
                    StatusType::Fail,
                    format!("Unexpected {} on recovery port.", other),
                );
                conn.send(&refusal).await?;
                break;
            }
        }
    }
    Ok(())
}

/// Periodically drain the inbox into [`Orchestrator::recover`]. The first
/// round runs one `period` after start.
pub fn spawn_recovery_loop<L: NodeLauncher, C: NodeCommander>(
    orchestrator: Arc<Orchestrator<L, C>>,
    inbox: Arc<RecoveryInbox>,
    period: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    recover_once(&orchestrator, &inbox).await;
                }
            }
        }
        tracing::debug!("recovery loop stopped");
    })
}

/// One recovery round. Returns the replacement nodes.
pub async fn recover_once<L: NodeLauncher, C: NodeCommander>(
    orchestrator: &Orchestrator<L, C>,
    inbox: &RecoveryInbox,
) -> Vec<RingEntry> {
    let dead = inbox.take();
    if dead.is_empty() {
        return Vec::new();
    }
    tracing::info!("recovering {} reported node(s)", dead.len());
    let added = orchestrator.recover(dead).await;
    if !added.is_empty() {
        tracing::info!("recovery added {} node(s)", added.len());
    }
    added
}
