//! Persistent connections keyed by `address:port`.

use crate::connection::Connection;
use crate::NetError;
use ringkv_config::NetworkConfig;
use ringkv_proto::{Message, Source};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Lazily connected, identified connections, one per peer address.
///
/// Each connection sits behind its own async mutex, so concurrent callers
/// to the same peer queue up and never interleave frames. A connection that
/// fails or times out is evicted; the next call reconnects.
#[derive(Debug)]
pub struct ConnectionPool {
    source: Source,
    network: NetworkConfig,
    conns: RwLock<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl ConnectionPool {
    /// `source` is what the pool identifies itself as on every new connection.
    pub fn new(source: Source, network: NetworkConfig) -> Self {
        Self {
            source,
            network,
            conns: RwLock::new(HashMap::new()),
        }
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    async fn get(&self, addr: &str) -> Result<Arc<Mutex<Connection>>, NetError> {
        {
            let conns = self.conns.read().await;
            if let Some(conn) = conns.get(addr) {
                return Ok(conn.clone());
            }
        }

        let mut conn = Connection::connect(addr, self.network.connect_timeout()).await?;
        conn.identify(self.source, self.network.request_timeout())
            .await?;
        tracing::debug!("pooled new {} connection to {}", self.source, addr);

        let mut conns = self.conns.write().await;
        Ok(conns
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(conn)))
            .clone())
    }

    /// Connect (and identify) ahead of the first request. Used where the
    /// handshake itself is worth retrying.
    pub async fn ensure(&self, addr: &str) -> Result<(), NetError> {
        self.get(addr).await.map(|_| ())
    }

    /// One request/response exchange with `addr`.
    pub async fn request(&self, addr: &str, msg: &Message) -> Result<Message, NetError> {
        let conn = self.get(addr).await?;
        let result = {
            let mut conn = conn.lock().await;
            conn.request(msg, self.network.request_timeout()).await
        };
        if let Err(e) = &result {
            tracing::debug!("evicting connection to {}: {}", addr, e);
            self.invalidate(addr).await;
        }
        result
    }

    /// Drop the pooled connection to `addr`, closing it.
    pub async fn invalidate(&self, addr: &str) {
        self.conns.write().await.remove(addr);
    }

    pub async fn clear(&self) {
        self.conns.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.conns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
