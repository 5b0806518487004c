//! Client request handling: responsibility, ownership and size checks in
//! front of the cache and the partition stores.

use crate::context::NodeContext;
use crate::convert::META_KEY;
use crate::peer_client::PeerClient;
use chrono::NaiveDateTime;
use ringkv_common::{hash_key, in_range};
use ringkv_proto::{parse_timestamp, KeyValue, Message, Source, StatusType};
use ringkv_storage::{PartitionRecord, PartitionStore, ReplicaSlot};

/// Longest accepted key, in bytes.
pub const MAX_KEY_BYTES: usize = 20;
/// Longest accepted value, in bytes.
pub const MAX_VALUE_BYTES: usize = 120 * 1024;
/// Reads are served for the primary range and the two ranges behind it.
pub const READ_RANGE_STEPS: usize = 3;

fn reply(status: StatusType, key: impl Into<String>, value: impl Into<String>) -> Message {
    Message::new(Source::Server, status).with(key, value)
}

pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// A record that exists and has not expired as of `now`.
fn live(store: &PartitionStore, key: &str, now: NaiveDateTime) -> Option<PartitionRecord> {
    store.get(key).filter(|r| !r.is_expired(now))
}

/// Handle one client frame. Always produces exactly one reply.
pub async fn handle_client<P: PeerClient>(ctx: &NodeContext<P>, msg: &Message) -> Message {
    let status = ctx.status();
    let key = msg
        .client_payload()
        .map(|kv| kv.key.clone())
        .unwrap_or_default();

    if !status.serves_clients() {
        return reply(
            StatusType::ServerStopped,
            key,
            "Server is stopped, no requests are processed",
        );
    }

    match msg.status {
        StatusType::Login => login(ctx, msg),
        StatusType::SignUp => sign_up(ctx, msg).await,
        StatusType::Get | StatusType::Put | StatusType::TimedPut | StatusType::Delete => {
            keyed(ctx, msg)
        }
        other => reply(
            StatusType::Fail,
            "",
            format!("{} is not a client request", other),
        ),
    }
}

fn keyed<P: PeerClient>(ctx: &NodeContext<P>, msg: &Message) -> Message {
    let Some(payload) = msg.client_payload() else {
        return reply(StatusType::Fail, "", "Request carries no key");
    };
    let key = payload.key.as_str();

    let Some(username) = msg.client_username().filter(|u| !u.is_empty()) else {
        return reply(StatusType::Fail, key, "Login or signup first, please!");
    };

    let Some(view) = ctx.view() else {
        return reply(StatusType::ServerStopped, key, "Server is not initialized");
    };

    let range = if msg.status == StatusType::Get {
        view.read_range()
    } else {
        view.primary_range()
    };
    let responsible = match range {
        Ok((lower, upper)) => in_range(&hash_key(key), &lower, &upper),
        Err(e) => {
            tracing::warn!("no range for {}: {}", view.me, e);
            false
        }
    };
    if !responsible {
        tracing::debug!("key '{}' outside range of {}", key, view.me);
        return Message::new(Source::Server, StatusType::ServerNotResponsible)
            .with(key, "Server is not responsible")
            .with(META_KEY, view.ring.to_text());
    }

    if msg.status == StatusType::Get {
        return get(ctx, username, key);
    }

    let now = now();
    ctx.write_gate(|| {
        // Ownership is answered before size checks; the store re-checks it
        // under its own lock when the write lands.
        if let Some(record) = live(&ctx.stores().primary, key, now) {
            if record.owner != username {
                return denied(msg.status, key);
            }
        }
        match msg.status {
            StatusType::Delete => delete(ctx, key, username, now),
            _ => put(ctx, msg, username, payload, now),
        }
    })
    .unwrap_or_else(|| {
        reply(
            StatusType::ServerWriteLock,
            key,
            "Cannot write while server is lock",
        )
    })
}

fn denied(request: StatusType, key: &str) -> Message {
    match request {
        StatusType::Delete => reply(
            StatusType::DeleteAccessDenied,
            key,
            "Cannot delete data owned by another user",
        ),
        _ => reply(
            StatusType::UpdateAccessDenied,
            key,
            "Cannot update data owned by another user",
        ),
    }
}

fn get<P: PeerClient>(ctx: &NodeContext<P>, username: &str, key: &str) -> Message {
    let cache = ctx.cache();
    if let Some(value) = cache.as_ref().and_then(|c| c.get(key, username)) {
        ringkv_metrics::metrics().cache_hits.inc();
        return reply(StatusType::GetSuccess, key, value);
    }
    ringkv_metrics::metrics().cache_misses.inc();

    let now = now();
    let stores = ctx.stores();
    let found = live(&stores.primary, key, now)
        .map(|r| (r, true))
        .or_else(|| live(stores.replica(ReplicaSlot::First), key, now).map(|r| (r, false)))
        .or_else(|| live(stores.replica(ReplicaSlot::Second), key, now).map(|r| (r, false)));

    match found {
        Some((record, _)) if record.owner != username => reply(
            StatusType::GetAccessDenied,
            key,
            "Cannot access data owned by another user",
        ),
        Some((record, from_primary)) => {
            // Only untimed primary records are cached; the cache has no
            // notion of expiry and replicas may be stale.
            if from_primary && record.expires_at.is_none() {
                if let Some(cache) = &cache {
                    cache.put(key, &record.value, &record.owner);
                }
            }
            reply(StatusType::GetSuccess, key, record.value)
        }
        None => Message::new(Source::Server, StatusType::GetError).with_opt(key, None),
    }
}

fn put<P: PeerClient>(
    ctx: &NodeContext<P>,
    msg: &Message,
    username: &str,
    payload: &KeyValue,
    now: NaiveDateTime,
) -> Message {
    let key = payload.key.as_str();
    let timed = msg.status == StatusType::TimedPut;
    let (ok_new, ok_update) = if timed {
        (StatusType::TimedPutSuccess, StatusType::TimedPutUpdate)
    } else {
        (StatusType::PutSuccess, StatusType::PutUpdate)
    };

    if key.len() > MAX_KEY_BYTES {
        return reply(
            StatusType::Fail,
            "",
            format!(
                "Key cannot be longer than {} bytes, the sent key's length was {}",
                MAX_KEY_BYTES,
                key.len()
            ),
        );
    }
    let Some(value) = payload.value_str() else {
        return reply(StatusType::Fail, key, "Value cannot be empty");
    };
    if value.len() > MAX_VALUE_BYTES {
        return reply(
            StatusType::Fail,
            "",
            format!(
                "Value cannot be longer than {} bytes, the sent value's length was {}",
                MAX_VALUE_BYTES,
                value.len()
            ),
        );
    }

    let expires_at = if timed {
        match msg.client_timestamp().and_then(parse_timestamp) {
            Some(t) => Some(t),
            None => return reply(StatusType::Fail, key, "Missing or malformed expiry time"),
        }
    } else {
        None
    };
    if let Some(t) = expires_at {
        if t <= now {
            tracing::debug!("key '{}' written with expiry already passed", key);
        }
    }

    let record = PartitionRecord::new(key, value, username).with_expiry(expires_at);
    let replaced = match ctx.stores().primary.put_if_owner(record, now) {
        Ok(replaced) => replaced,
        Err(e) => {
            tracing::debug!("lost ownership race: {}", e);
            return denied(msg.status, key);
        }
    };

    if let Some(cache) = ctx.cache() {
        if timed {
            cache.invalidate(key);
        } else {
            cache.put(key, value, username);
        }
    }

    let status = if replaced.is_some() { ok_update } else { ok_new };
    reply(status, key, value)
}

fn delete<P: PeerClient>(
    ctx: &NodeContext<P>,
    key: &str,
    username: &str,
    now: NaiveDateTime,
) -> Message {
    match ctx.stores().primary.remove_if_owner(key, username, now) {
        Ok(Some(record)) => {
            if let Some(cache) = ctx.cache() {
                cache.invalidate(key);
            }
            reply(StatusType::DeleteSuccess, key, record.value)
        }
        Ok(None) => reply(StatusType::DeleteError, key, "Key not found"),
        Err(_) => denied(StatusType::Delete, key),
    }
}

// ── Accounts ──

fn credentials(msg: &Message) -> Option<(&str, Option<&str>)> {
    let kv = msg.client_payload()?;
    Some((kv.key.as_str(), kv.value_str()))
}

fn login<P: PeerClient>(ctx: &NodeContext<P>, msg: &Message) -> Message {
    let Some((username, password)) = credentials(msg) else {
        return reply(StatusType::LoginError, "", "Missing credentials");
    };
    let Some(password) = password else {
        return reply(StatusType::LoginError, username, "Password cannot be empty");
    };
    if ctx.stores().accounts.authenticate(username, password) {
        reply(StatusType::LoginSuccess, "", username)
    } else {
        reply(StatusType::LoginError, username, "Wrong username or password")
    }
}

async fn sign_up<P: PeerClient>(ctx: &NodeContext<P>, msg: &Message) -> Message {
    let Some((username, password)) = credentials(msg) else {
        return reply(StatusType::SignUpError, "", "Missing credentials");
    };
    if username.is_empty() {
        return reply(StatusType::SignUpError, "", "Username cannot be empty");
    }
    let Some(password) = password else {
        return reply(StatusType::SignUpError, username, "Password cannot be empty");
    };
    if !ctx.stores().accounts.put(username, password) {
        return reply(StatusType::SignUpError, username, "User already exists");
    }

    if let Some(view) = ctx.view() {
        let peers = ctx.peers();
        let calls = view
            .ring
            .iter()
            .filter(|e| **e != view.me)
            .map(|target| async move {
                if let Err(e) = peers.add_user(target, username, password).await {
                    tracing::warn!("ADD_USER '{}' to {} failed: {}", username, target, e);
                }
            });
        futures::future::join_all(calls).await;
    }
    reply(StatusType::SignUpSuccess, "", username)
}
