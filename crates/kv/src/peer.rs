//! Requests arriving from other storage nodes.

use crate::context::NodeContext;
use crate::convert::{pairs_to_records, parse_replicate};
use crate::peer_client::PeerClient;
use ringkv_common::in_range;
use ringkv_proto::{Message, Source, StatusType};
use ringkv_ring::RingEntry;
use ringkv_storage::ReplicaSlot;

fn ack(status: StatusType) -> Message {
    Message::empty(Source::Server, status)
}

fn refuse(status: StatusType, reason: impl Into<String>) -> Message {
    Message::text(Source::Server, status, reason)
}

pub fn handle_peer<P: PeerClient>(ctx: &NodeContext<P>, msg: &Message) -> Message {
    match msg.status {
        StatusType::Identify => {
            Message::text(Source::Server, StatusType::Info, "Already identified")
        }
        StatusType::Ping => ack(StatusType::Pong),
        StatusType::MoveData => move_data(ctx, msg),
        StatusType::Replicate => replicate(ctx, msg),
        StatusType::AddUser => add_user(ctx, msg),
        other => refuse(StatusType::Fail, format!("Unsupported server request {}", other)),
    }
}

fn move_data<P: PeerClient>(ctx: &NodeContext<P>, msg: &Message) -> Message {
    let records = match pairs_to_records(&msg.pairs) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("rejecting MOVE_DATA: {}", e);
            return refuse(StatusType::MoveDataFail, e.to_string());
        }
    };
    let keys: Vec<String> = records.iter().map(|r| r.key.clone()).collect();
    let stored = ctx.stores().primary.put_all(records);
    ctx.invalidate_cached(&keys);
    // The handed-over range supersedes the predecessor's replica; promoting
    // that copy later would bring back keys deleted since the last push.
    ctx.stores().replica(ReplicaSlot::First).replicate(Vec::new());
    tracing::info!("received {} records by MOVE_DATA", stored);
    ack(StatusType::MoveDataSuccess)
}

/// Which replica slot a push from `sender` belongs in. The immediate
/// predecessor fills slot one; anything further back fills slot two.
pub fn replica_slot_for<P: PeerClient>(
    ctx: &NodeContext<P>,
    sender: &RingEntry,
) -> Option<ReplicaSlot> {
    let view = ctx.view()?;
    let pred = view.ring.predecessor(&view.me).ok()?;
    let pred_pred = view.ring.predecessor(pred).ok()?;
    if in_range(&sender.position, &pred_pred.position, &pred.position) {
        Some(ReplicaSlot::First)
    } else {
        Some(ReplicaSlot::Second)
    }
}

fn replicate<P: PeerClient>(ctx: &NodeContext<P>, msg: &Message) -> Message {
    let (sender, records) = match parse_replicate(msg) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("rejecting REPLICATE: {}", e);
            return refuse(StatusType::ReplicateFail, e.to_string());
        }
    };
    let Some(slot) = replica_slot_for(ctx, &sender) else {
        return refuse(StatusType::ReplicateFail, "Server is not initialized");
    };
    tracing::debug!("replica {:?} <- {} records from {}", slot, records.len(), sender);
    ctx.stores().replica(slot).replicate(records);
    ack(StatusType::ReplicateSuccess)
}

fn add_user<P: PeerClient>(ctx: &NodeContext<P>, msg: &Message) -> Message {
    let Some(pair) = msg.first() else {
        return refuse(StatusType::AddUserError, "Missing credentials");
    };
    let username = pair.key.as_str();
    let Some(password) = pair.value_str() else {
        return Message::new(Source::Server, StatusType::AddUserError)
            .with(username, "Password cannot be empty");
    };
    if ctx.stores().accounts.put(username, password) {
        Message::new(Source::Server, StatusType::AddUserSuccess).with("", username)
    } else {
        Message::new(Source::Server, StatusType::AddUserError).with(username, "User already exists")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{add_user_request, move_data_request, replicate_request};
    use crate::test_support::node_with_ring;
    use ringkv_ring::HashRing;
    use ringkv_storage::PartitionRecord;

    fn entries(n: u16) -> Vec<RingEntry> {
        (0..n)
            .map(|i| RingEntry::new(format!("n{}", i), "127.0.0.1", 50000 + i))
            .collect()
    }

    #[test]
    fn test_ping_pong() {
        let all = entries(1);
        let ctx = node_with_ring(all[0].clone(), all);
        let r = handle_peer(&ctx, &Message::empty(Source::Server, StatusType::Ping));
        assert_eq!(r.status, StatusType::Pong);
        assert_eq!(r.pairs.len(), 1);
    }

    #[test]
    fn test_move_data_upserts() {
        let all = entries(1);
        let ctx = node_with_ring(all[0].clone(), all);
        ctx.stores().primary.put(PartitionRecord::new("a", "old", "u"));
        let batch = vec![
            PartitionRecord::new("a", "new", "u"),
            PartitionRecord::new("b", "2", "u"),
        ];
        let r = handle_peer(&ctx, &move_data_request(&batch));
        assert_eq!(r.status, StatusType::MoveDataSuccess);
        assert_eq!(ctx.stores().primary.get("a").unwrap().value, "new");
        assert_eq!(ctx.stores().primary.len(), 2);
    }

    #[test]
    fn test_replicate_picks_slot_by_sender_distance() {
        let all = entries(5);
        let ring = HashRing::from_entries(all.clone());
        let me = all[0].clone();
        let pred = ring.predecessor(&me).unwrap().clone();
        let pred_pred = ring.predecessor(&pred).unwrap().clone();
        let ctx = node_with_ring(me, all);

        let r = handle_peer(
            &ctx,
            &replicate_request(&pred, &[PartitionRecord::new("p", "1", "u")]),
        );
        assert_eq!(r.status, StatusType::ReplicateSuccess);
        let r = handle_peer(
            &ctx,
            &replicate_request(&pred_pred, &[PartitionRecord::new("pp", "2", "u")]),
        );
        assert_eq!(r.status, StatusType::ReplicateSuccess);

        assert!(ctx.stores().replica(ReplicaSlot::First).contains("p"));
        assert!(ctx.stores().replica(ReplicaSlot::Second).contains("pp"));
        assert!(ctx.stores().primary.is_empty());

        // A second push replaces the slot wholesale.
        handle_peer(
            &ctx,
            &replicate_request(&pred, &[PartitionRecord::new("q", "1", "u")]),
        );
        let first = ctx.stores().replica(ReplicaSlot::First);
        assert!(!first.contains("p"));
        assert!(first.contains("q"));
    }

    #[test]
    fn test_add_user() {
        let all = entries(1);
        let ctx = node_with_ring(all[0].clone(), all);
        let r = handle_peer(&ctx, &add_user_request("bob", "pw"));
        assert_eq!(r.status, StatusType::AddUserSuccess);
        assert_eq!(r.first().unwrap().value_str(), Some("bob"));
        assert!(ctx.stores().accounts.authenticate("bob", "pw"));

        let r = handle_peer(&ctx, &add_user_request("bob", "other"));
        assert_eq!(r.status, StatusType::AddUserError);
        assert_eq!(r.first().unwrap().key, "bob");
    }

    #[test]
    fn test_move_data_clears_predecessor_replica() {
        let all = entries(3);
        let ring = HashRing::from_entries(all.clone());
        let me = all[0].clone();
        let pred = ring.predecessor(&me).unwrap().clone();
        let ctx = node_with_ring(me, all);
        handle_peer(
            &ctx,
            &replicate_request(&pred, &[PartitionRecord::new("gone", "stale", "u")]),
        );
        assert!(!ctx.stores().replica(ReplicaSlot::First).is_empty());

        let r = handle_peer(&ctx, &move_data_request(&[PartitionRecord::new("kept", "1", "u")]));
        assert_eq!(r.status, StatusType::MoveDataSuccess);
        assert!(ctx.stores().replica(ReplicaSlot::First).is_empty());
        assert!(ctx.stores().primary.contains("kept"));
    }

    #[test]
    fn test_malformed_move_data_fails() {
        let all = entries(1);
        let ctx = node_with_ring(all[0].clone(), all);
        let msg = Message::new(Source::Server, StatusType::MoveData).with("only", "one");
        let r = handle_peer(&ctx, &msg);
        assert_eq!(r.status, StatusType::MoveDataFail);
    }
}
