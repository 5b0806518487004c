//! Controller-to-node command channel.

use async_trait::async_trait;
use ringkv_config::NetworkConfig;
use ringkv_net::{ConnectionPool, NetError};
use ringkv_proto::{Message, Source};
use ringkv_ring::RingEntry;

/// Synchronous request/response commands sent to ring members.
///
/// The TCP implementation keeps one identified controller connection per
/// node; tests can substitute a recording implementation.
#[async_trait]
pub trait NodeCommander: Send + Sync + 'static {
    /// Open the controller connection and complete the IDENTIFY handshake.
    async fn connect(&self, node: &RingEntry) -> Result<(), NetError>;

    /// Send one command and wait for its reply.
    async fn send(&self, node: &RingEntry, msg: &Message) -> Result<Message, NetError>;

    /// Close the connection to `node`, if any.
    async fn disconnect(&self, node: &RingEntry);
}

/// [`NodeCommander`] over pooled TCP connections identified as `ECS`.
#[derive(Debug)]
pub struct TcpCommander {
    pool: ConnectionPool,
}

impl TcpCommander {
    pub fn new(network: NetworkConfig) -> Self {
        Self {
            pool: ConnectionPool::new(Source::Ecs, network),
        }
    }

    pub async fn connected(&self) -> usize {
        self.pool.len().await
    }
}

#[async_trait]
impl NodeCommander for TcpCommander {
    async fn connect(&self, node: &RingEntry) -> Result<(), NetError> {
        self.pool.ensure(&node.addr()).await
    }

    async fn send(&self, node: &RingEntry, msg: &Message) -> Result<Message, NetError> {
        self.pool.request(&node.addr(), msg).await
    }

    async fn disconnect(&self, node: &RingEntry) {
        self.pool.invalidate(&node.addr()).await;
    }
}
