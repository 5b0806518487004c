//! Node-side accept loop.
//!
//! Bridges framed TCP connections to the transport-independent handlers in
//! `ringkv_kv::service`.

use crate::connection::Connection;
use crate::NetError;
use ringkv_kv::{dispatch, greet, Greeting, NodeContext, PeerClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// Accept connections until the node's shutdown token fires.
pub async fn serve<P: PeerClient>(listener: TcpListener, ctx: Arc<NodeContext<P>>) {
    let shutdown = ctx.shutdown_token().clone();
    match listener.local_addr() {
        Ok(addr) => tracing::info!("node listening on {}", addr),
        Err(e) => tracing::warn!("listener has no local address: {}", e),
    }
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, ctx).await {
                            tracing::warn!("connection from {} dropped: {}", peer, e);
                        }
                    });
                }
                Err(e) => tracing::warn!("accept failed: {}", e),
            }
        }
    }
    tracing::info!("stopped accepting connections");
}

pub fn spawn_server<P: PeerClient>(
    listener: TcpListener,
    ctx: Arc<NodeContext<P>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(serve(listener, ctx))
}

async fn handle_connection<P: PeerClient>(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<NodeContext<P>>,
) -> Result<(), NetError> {
    let mut conn = Connection::new(stream, peer.to_string());
    let shutdown = ctx.shutdown_token().clone();

    let first = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        first = conn.recv() => first?,
    };
    let Some(first) = first else {
        return Ok(());
    };
    let source = first.source;
    match greet(&ctx, &first) {
        Greeting::Reply(greeting) => conn.send(&greeting).await?,
        Greeting::Reject(refusal) => {
            conn.send(&refusal).await?;
            return Ok(());
        }
        Greeting::Silent => {}
    }

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = conn.recv() => next?,
        };
        let Some(msg) = next else { break };
        let reply = dispatch(&ctx, source, msg).await;
        conn.send(&reply.message).await?;
        if reply.shutdown {
            tracing::info!("shutdown requested by {}", peer);
            ctx.begin_shutdown();
        }
        if reply.close {
            break;
        }
    }
    tracing::debug!("{} connection from {} closed", source, peer);
    Ok(())
}
