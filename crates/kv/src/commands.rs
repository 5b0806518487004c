//! Orchestrator command handling and the data reshuffles that follow ring
//! changes.

use crate::context::NodeContext;
use crate::convert::{parse_init, parse_move_data_command, parse_update};
use crate::peer_client::PeerClient;
use crate::status::Command;
use crate::{expiry, failure_detector, replication};
use ringkv_cache::{EvictionCache, EvictionPolicy};
use ringkv_proto::{Message, Source, StatusType};
use ringkv_storage::ReplicaSlot;
use std::sync::Arc;

/// Reply to an orchestrator command plus whether the node must now exit.
#[derive(Debug)]
pub struct CommandReply {
    pub message: Message,
    pub shutdown: bool,
}

impl CommandReply {
    fn done(text: &str) -> Self {
        Self {
            message: Message::text(Source::Server, StatusType::Done, text),
            shutdown: false,
        }
    }

    fn fail(text: impl Into<String>) -> Self {
        Self {
            message: Message::text(Source::Server, StatusType::Fail, text),
            shutdown: false,
        }
    }
}

pub async fn handle_ecs<P: PeerClient>(ctx: &Arc<NodeContext<P>>, msg: &Message) -> CommandReply {
    let reply = match msg.status {
        StatusType::Identify => CommandReply {
            message: Message::text(Source::Server, StatusType::Info, "Already identified"),
            shutdown: false,
        },
        StatusType::Init => init(ctx, msg),
        StatusType::Start => simple(
            ctx,
            Command::Start,
            "Server Started.",
            "Server already active or in write lock.",
        ),
        StatusType::Stop => simple(
            ctx,
            Command::Stop,
            "Server Stopped.",
            "Server uninitialized, already stopped or in write lock.",
        ),
        StatusType::LockWrite => simple(
            ctx,
            Command::LockWrite,
            "Server locked for writing.",
            "Server stopped or uninitialized.",
        ),
        StatusType::UnlockWrite => unlock_write(ctx),
        StatusType::Update => update(ctx, msg),
        StatusType::MoveData => move_data(ctx, msg).await,
        StatusType::Shutdown => {
            ctx.transition(Command::Shutdown);
            CommandReply {
                message: Message::text(Source::Server, StatusType::Done, "Server Shutting down..."),
                shutdown: true,
            }
        }
        other => CommandReply::fail(format!("Unsupported command {}", other)),
    };
    ringkv_metrics::metrics()
        .membership_ops
        .with_label_values(&[msg.status.as_str()])
        .inc();
    reply
}

fn simple<P: PeerClient>(ctx: &NodeContext<P>, cmd: Command, ok: &str, err: &str) -> CommandReply {
    match ctx.transition(cmd) {
        Some(_) => CommandReply::done(ok),
        None => CommandReply::fail(err),
    }
}

fn init<P: PeerClient>(ctx: &Arc<NodeContext<P>>, msg: &Message) -> CommandReply {
    let cmd = match parse_init(msg) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::warn!("malformed INIT: {}", e);
            return CommandReply::fail(format!("Malformed INIT: {}", e));
        }
    };
    if ctx.transition(Command::Init).is_none() {
        return CommandReply::fail("Server already initialized.");
    }

    let policy = cmd.strategy.parse().unwrap_or_else(|e| {
        tracing::warn!("{}; falling back to LFU", e);
        EvictionPolicy::Lfu
    });
    tracing::info!(
        "initialized as {} in a ring of {} (cache {} x {})",
        cmd.target,
        cmd.ring.len(),
        cmd.cache_size,
        policy
    );
    ctx.install(cmd.target, cmd.ring, EvictionCache::new(cmd.cache_size, policy));
    start_loops(ctx);
    CommandReply::done("Server Initialized.")
}

fn start_loops<P: PeerClient>(ctx: &Arc<NodeContext<P>>) {
    let root = ctx.shutdown_token();
    let settings = ctx.settings();
    ctx.track_loop(failure_detector::spawn_failure_detector(
        ctx.clone(),
        settings.failure_detection_interval,
        root.child_token(),
    ));
    ctx.track_loop(replication::spawn_replication(
        ctx.clone(),
        settings.replication_interval,
        root.child_token(),
    ));
    ctx.track_loop(expiry::spawn_expiry_sweep(
        ctx.clone(),
        settings.expiry_sweep_interval,
        root.child_token(),
    ));
}

fn unlock_write<P: PeerClient>(ctx: &NodeContext<P>) -> CommandReply {
    if ctx.transition(Command::UnlockWrite).is_none() {
        return CommandReply::fail("Server has to be locked to unlock.");
    }
    drop_out_of_range(ctx);
    CommandReply::done("Server unlocked for writing.")
}

fn update<P: PeerClient>(ctx: &NodeContext<P>, msg: &Message) -> CommandReply {
    let ring = match parse_update(msg) {
        Ok(ring) => ring,
        Err(e) => {
            tracing::warn!("malformed UPDATE: {}", e);
            return CommandReply::fail(format!("Malformed UPDATE: {}", e));
        }
    };
    if ctx.transition(Command::Update).is_none() {
        return CommandReply::fail("Server uninitialized.");
    }
    tracing::info!("ring updated to {} members", ring.len());
    ctx.replace_ring(ring);
    promote_replicas(ctx);
    drop_out_of_range(ctx);
    CommandReply::done("Metadata updated.")
}

async fn move_data<P: PeerClient>(ctx: &NodeContext<P>, msg: &Message) -> CommandReply {
    let (from, to) = match parse_move_data_command(msg) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!("malformed MOVE_DATA: {}", e);
            return CommandReply::fail("Data move failed.");
        }
    };
    if ctx.transition(Command::MoveData).is_none() {
        return CommandReply::fail("Data move failed.");
    }
    let records = ctx
        .stores()
        .primary
        .range_query(&from.position, &to.position);
    tracing::info!("moving {} records in ({}, {}] to {}", records.len(), from, to, to);
    match ctx.peers().move_data(&to, &records).await {
        Ok(()) => CommandReply::done("Data moved."),
        Err(e) => {
            tracing::warn!("MOVE_DATA to {} failed: {}", to, e);
            CommandReply::fail("Data move failed.")
        }
    }
}

/// Delete primary records the current ring assigns elsewhere.
pub fn drop_out_of_range<P: PeerClient>(ctx: &NodeContext<P>) -> Vec<String> {
    let Some(view) = ctx.view() else {
        return Vec::new();
    };
    let (lower, upper) = match view.primary_range() {
        Ok(range) => range,
        Err(e) => {
            tracing::warn!("{} not in current ring, keeping data: {}", view.me, e);
            return Vec::new();
        }
    };
    let removed = ctx.stores().primary.retain_range(&lower, &upper);
    if !removed.is_empty() {
        tracing::info!("dropped {} out-of-range records", removed.len());
        ctx.invalidate_cached(&removed);
    }
    removed
}

/// Copy replica records that now fall in the primary range into the
/// primary store, without overwriting anything already there.
pub fn promote_replicas<P: PeerClient>(ctx: &NodeContext<P>) -> usize {
    let Some(view) = ctx.view() else {
        return 0;
    };
    let Ok((lower, upper)) = view.primary_range() else {
        return 0;
    };
    let stores = ctx.stores();
    let mut promoted = 0;
    for slot in [ReplicaSlot::First, ReplicaSlot::Second] {
        let candidates = stores.replica(slot).range_query(&lower, &upper);
        promoted += stores.primary.put_absent(candidates);
    }
    if promoted > 0 {
        tracing::info!("promoted {} replica records to primary", promoted);
    }
    promoted
}
