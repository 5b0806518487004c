//! TCP implementation of the node's outbound [`PeerClient`] calls.

use crate::connection::Connection;
use crate::pool::ConnectionPool;
use crate::NetError;
use ringkv_config::NetworkConfig;
use ringkv_kv::convert::{add_user_request, dead_server_report, move_data_request, replicate_request};
use ringkv_kv::{PeerClient, PeerError};
use ringkv_proto::{Message, Source, StatusType};
use ringkv_ring::RingEntry;
use ringkv_storage::PartitionRecord;

impl From<NetError> for PeerError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Timeout(_) => PeerError::Timeout,
            NetError::Closed => PeerError::Closed,
            other => PeerError::RequestFailed(other.to_string()),
        }
    }
}

fn expect(reply: Message, expected: StatusType) -> Result<(), PeerError> {
    if reply.status == expected {
        Ok(())
    } else {
        Err(PeerError::UnexpectedReply {
            expected,
            got: reply.status,
        })
    }
}

/// Bulk transfers reuse pooled SERVER connections. Liveness probes and dead
/// reports always open a fresh connection so a stale pooled socket cannot
/// mask a dead peer.
#[derive(Debug)]
pub struct TcpPeerClient {
    pool: ConnectionPool,
}

impl TcpPeerClient {
    pub fn new(network: NetworkConfig) -> Self {
        Self {
            pool: ConnectionPool::new(Source::Server, network),
        }
    }

    fn network(&self) -> &NetworkConfig {
        self.pool.network()
    }

    async fn pooled(&self, target: &RingEntry, msg: Message, ok: StatusType) -> Result<(), PeerError> {
        let m = ringkv_metrics::metrics();
        let label = msg.status.as_str();
        m.peer_requests_sent.with_label_values(&[label]).inc();
        let result = match self.pool.request(&target.addr(), &msg).await {
            Ok(reply) => expect(reply, ok),
            Err(e) => Err(e.into()),
        };
        if result.is_err() {
            m.peer_request_failures.with_label_values(&[label]).inc();
        }
        result
    }

    async fn one_shot(&self, addr: &str, msg: &Message) -> Result<Message, NetError> {
        let mut conn = Connection::connect(addr, self.network().connect_timeout()).await?;
        conn.identify(Source::Server, self.network().request_timeout())
            .await?;
        conn.request(msg, self.network().request_timeout()).await
    }
}

#[async_trait::async_trait]
impl PeerClient for TcpPeerClient {
    async fn ping(&self, target: &RingEntry) -> Result<(), PeerError> {
        let ping = Message::empty(Source::Server, StatusType::Ping);
        let reply = self.one_shot(&target.addr(), &ping).await?;
        expect(reply, StatusType::Pong)
    }

    async fn move_data(
        &self,
        target: &RingEntry,
        records: &[PartitionRecord],
    ) -> Result<(), PeerError> {
        self.pooled(target, move_data_request(records), StatusType::MoveDataSuccess)
            .await
    }

    async fn replicate(
        &self,
        target: &RingEntry,
        source: &RingEntry,
        records: &[PartitionRecord],
    ) -> Result<(), PeerError> {
        self.pooled(
            target,
            replicate_request(source, records),
            StatusType::ReplicateSuccess,
        )
        .await
    }

    async fn add_user(
        &self,
        target: &RingEntry,
        username: &str,
        password: &str,
    ) -> Result<(), PeerError> {
        self.pooled(
            target,
            add_user_request(username, password),
            StatusType::AddUserSuccess,
        )
        .await
    }

    async fn report_dead(&self, recovery_addr: &str, dead: &RingEntry) -> Result<(), PeerError> {
        let reply = self.one_shot(recovery_addr, &dead_server_report(dead)).await?;
        expect(reply, StatusType::Done)
    }
}
