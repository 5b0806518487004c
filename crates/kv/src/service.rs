//! Transport-independent connection handling.
//!
//! A connection is classified once, by the source of its first frame. Every
//! later frame is routed by that classification; the source field of later
//! frames is not consulted.

use crate::commands::handle_ecs;
use crate::context::NodeContext;
use crate::convert::META_KEY;
use crate::peer::handle_peer;
use crate::peer_client::PeerClient;
use crate::router::handle_client;
use ringkv_proto::{Message, Source, StatusType};
use std::sync::Arc;

/// Outcome of the first frame on a connection.
#[derive(Debug)]
pub enum Greeting {
    /// Send this frame, then serve requests.
    Reply(Message),
    /// Send this frame, then close.
    Reject(Message),
    /// Serve requests without sending anything first.
    Silent,
}

/// Response to one request frame.
#[derive(Debug)]
pub struct Reply {
    pub message: Message,
    /// Close the connection after sending.
    pub close: bool,
    /// Shut the node down after sending.
    pub shutdown: bool,
}

impl Reply {
    fn plain(message: Message) -> Self {
        Self {
            message,
            close: false,
            shutdown: false,
        }
    }
}

/// Classify a new connection by its first frame's source.
pub fn greet<P: PeerClient>(ctx: &NodeContext<P>, first: &Message) -> Greeting {
    tracing::debug!("new {} connection ({})", first.source, first.status);
    match first.source {
        Source::Ecs => Greeting::Reply(Message::text(
            Source::Server,
            StatusType::Info,
            "Finish starting server",
        )),
        Source::Client if !ctx.status().serves_clients() => Greeting::Reject(Message::text(
            Source::Server,
            StatusType::ServerStopped,
            "Server is not ready to handle client requests",
        )),
        Source::Client => Greeting::Reply(
            Message::new(Source::Server, StatusType::Info)
                .with("response", format!("Connected to {}", ctx.settings().addr()))
                .with(META_KEY, ctx.ring_text()),
        ),
        Source::Server => Greeting::Silent,
    }
}

/// Route one request frame on a connection classified as `source`.
pub async fn dispatch<P: PeerClient>(
    ctx: &Arc<NodeContext<P>>,
    source: Source,
    msg: Message,
) -> Reply {
    let m = ringkv_metrics::metrics();
    let label = msg.status.as_str();
    m.requests_by_status.with_label_values(&[label]).inc();
    let _timer = ringkv_metrics::start_request_timer(label);

    let reply = match source {
        Source::Client => Reply::plain(handle_client(ctx, &msg).await),
        Source::Server => Reply::plain(handle_peer(ctx, &msg)),
        Source::Ecs => {
            let r = handle_ecs(ctx, &msg).await;
            Reply {
                message: r.message,
                close: r.shutdown,
                shutdown: r.shutdown,
            }
        }
    };
    m.responses_by_status
        .with_label_values(&[reply.message.status.as_str()])
        .inc();
    reply
}
