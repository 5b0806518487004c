//! Routing client for the key/value service.
//!
//! `KvClient` keeps the ring it was last given and sends each key operation
//! straight to the responsible node. A `SERVER_NOT_RESPONSIBLE` reply
//! carries a fresh ring; the client adopts it and retries once.

use crate::connection::Connection;
use crate::NetError;
use ringkv_config::NetworkConfig;
use ringkv_proto::{Message, Source, StatusType};
use ringkv_ring::HashRing;
use std::collections::HashMap;
use std::time::Duration;

const META_KEY: &str = "meta";

#[derive(Debug)]
pub struct KvClient {
    network: NetworkConfig,
    entry_addr: String,
    ring: HashRing,
    conns: HashMap<String, Connection>,
    username: Option<String>,
}

fn ring_of(msg: &Message) -> Result<Option<HashRing>, NetError> {
    match msg.value_of(META_KEY) {
        Some(text) => Ok(Some(HashRing::from_text(text)?)),
        None => Ok(None),
    }
}

impl KvClient {
    /// Connect to any node and take the ring from its greeting.
    pub async fn connect(addr: &str, network: NetworkConfig) -> Result<Self, NetError> {
        let mut conn = Connection::connect(addr, network.connect_timeout()).await?;
        let greeting = conn
            .identify(Source::Client, network.request_timeout())
            .await?
            .ok_or(NetError::Closed)?;
        let ring = ring_of(&greeting)?.unwrap_or_default();
        tracing::debug!("connected to {} ({} ring members)", addr, ring.len());

        let mut conns = HashMap::new();
        conns.insert(addr.to_string(), conn);
        Ok(Self {
            network,
            entry_addr: addr.to_string(),
            ring,
            conns,
            username: None,
        })
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    // ── Accounts ──

    pub async fn login(&mut self, username: &str, password: &str) -> Result<Message, NetError> {
        self.account(StatusType::Login, StatusType::LoginSuccess, username, password)
            .await
    }

    pub async fn sign_up(&mut self, username: &str, password: &str) -> Result<Message, NetError> {
        self.account(StatusType::SignUp, StatusType::SignUpSuccess, username, password)
            .await
    }

    async fn account(
        &mut self,
        status: StatusType,
        success: StatusType,
        username: &str,
        password: &str,
    ) -> Result<Message, NetError> {
        let msg = Message::client(status, None, None, username, Some(password.to_string()));
        let addr = self.entry_addr.clone();
        let reply = self.exchange(&addr, &msg).await?;
        if reply.status == success {
            self.username = Some(username.to_string());
        }
        Ok(reply)
    }

    // ── Keys ──

    pub async fn put(&mut self, key: &str, value: &str) -> Result<Message, NetError> {
        self.keyed(StatusType::Put, key, Some(value.to_string()), None)
            .await
    }

    /// Store `value` so that it expires `ttl` from now.
    pub async fn timed_put(
        &mut self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<Message, NetError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| NetError::Invalid(format!("ttl out of range: {}", e)))?;
        let expires = chrono::Local::now().naive_local() + ttl;
        self.keyed(StatusType::TimedPut, key, Some(value.to_string()), Some(expires))
            .await
    }

    pub async fn get(&mut self, key: &str) -> Result<Message, NetError> {
        self.keyed(StatusType::Get, key, None, None).await
    }

    pub async fn delete(&mut self, key: &str) -> Result<Message, NetError> {
        self.keyed(StatusType::Delete, key, None, None).await
    }

    async fn keyed(
        &mut self,
        status: StatusType,
        key: &str,
        value: Option<String>,
        expires: Option<chrono::NaiveDateTime>,
    ) -> Result<Message, NetError> {
        let msg = Message::client(status, self.username.as_deref(), expires, key, value);

        let addr = self.route(key);
        let reply = self.exchange(&addr, &msg).await?;
        if reply.status != StatusType::ServerNotResponsible {
            return Ok(reply);
        }

        if let Some(ring) = ring_of(&reply)? {
            tracing::debug!("adopting ring of {} members from {}", ring.len(), addr);
            self.ring = ring;
        }
        let retry = self.route(key);
        if retry == addr {
            return Ok(reply);
        }
        self.exchange(&retry, &msg).await
    }

    fn route(&self, key: &str) -> String {
        self.ring
            .route(key)
            .map(|e| e.addr())
            .unwrap_or_else(|_| self.entry_addr.clone())
    }

    async fn exchange(&mut self, addr: &str, msg: &Message) -> Result<Message, NetError> {
        if !self.conns.contains_key(addr) {
            let mut conn = Connection::connect(addr, self.network.connect_timeout()).await?;
            conn.identify(Source::Client, self.network.request_timeout())
                .await?;
            self.conns.insert(addr.to_string(), conn);
        }
        let timeout = self.network.request_timeout();
        let result = match self.conns.get_mut(addr) {
            Some(conn) => conn.request(msg, timeout).await,
            None => Err(NetError::Closed),
        };
        if result.is_err() {
            self.conns.remove(addr);
        }
        result
    }
}
