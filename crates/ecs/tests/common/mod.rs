//! In-process cluster harness: real `ringkv-node` servers on ephemeral
//! ports, started by the orchestrator through [`InProcessLauncher`].

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use ringkv_config::NetworkConfig;
use ringkv_ecs::recovery::spawn_recovery_listener;
use ringkv_ecs::{
    CacheConfig, LaunchError, NodeLauncher, Orchestrator, OrchestratorSettings, RecoveryEndpoint,
    RecoveryInbox, TcpCommander,
};
use ringkv_kv::{NodeContext, NodeSettings};
use ringkv_net::{spawn_server, KvClient, TcpPeerClient};
use ringkv_ring::{HashRing, RingEntry};
use ringkv_storage::NodeStores;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

pub type Ctx = Arc<NodeContext<TcpPeerClient>>;

pub fn network() -> NetworkConfig {
    NetworkConfig {
        connect_timeout_ms: 1000,
        request_timeout_ms: 3000,
    }
}

/// Launches nodes as tasks in this process. Roster ports are reserved up
/// front so the roster can be written before anything is launched.
pub struct InProcessLauncher {
    reserved: Mutex<HashMap<String, TcpListener>>,
    running: Mutex<HashMap<String, (Ctx, JoinHandle<()>)>>,
}

impl InProcessLauncher {
    /// Reserve `n` ports and return the launcher with the matching roster.
    pub async fn reserve(n: usize) -> (Arc<Self>, HashRing) {
        let mut reserved = HashMap::new();
        let mut roster = HashRing::new();
        for i in 0..n {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let entry = RingEntry::new(format!("node{}", i), "127.0.0.1", port);
            reserved.insert(entry.addr(), listener);
            roster.add(entry).unwrap();
        }
        let launcher = Arc::new(Self {
            reserved: Mutex::new(reserved),
            running: Mutex::new(HashMap::new()),
        });
        (launcher, roster)
    }

    pub fn node(&self, entry: &RingEntry) -> Option<Ctx> {
        self.running
            .lock()
            .get(&entry.addr())
            .map(|(ctx, _)| ctx.clone())
    }

    /// Stop a node the hard way: no data hand-over, no goodbye.
    pub async fn kill(&self, entry: &RingEntry) {
        let Some((ctx, server)) = self.running.lock().remove(&entry.addr()) else {
            return;
        };
        ctx.begin_shutdown();
        let _ = server.await;
        ctx.finish_shutdown().await;
    }

    pub async fn kill_all(&self) {
        let addrs: Vec<String> = self.running.lock().keys().cloned().collect();
        for addr in addrs {
            let taken = self.running.lock().remove(&addr);
            if let Some((ctx, server)) = taken {
                ctx.begin_shutdown();
                let _ = server.await;
                ctx.finish_shutdown().await;
            }
        }
    }
}

#[async_trait]
impl NodeLauncher for InProcessLauncher {
    async fn launch(
        &self,
        node: &RingEntry,
        recovery: &RecoveryEndpoint,
    ) -> Result<(), LaunchError> {
        let spawn_err = |source: std::io::Error| LaunchError::Spawn {
            node: node.to_string(),
            source,
        };
        let reserved = self.reserved.lock().remove(&node.addr());
        let listener = match reserved {
            Some(listener) => listener,
            None => TcpListener::bind(node.addr()).await.map_err(spawn_err)?,
        };

        let mut settings = NodeSettings::new(node.address.clone(), node.port, recovery.addr());
        // Loops are driven by hand in tests.
        settings.failure_detection_interval = Duration::from_secs(3600);
        settings.replication_interval = Duration::from_secs(3600);
        settings.expiry_sweep_interval = Duration::from_millis(100);
        let ctx = Arc::new(NodeContext::new(
            settings,
            NodeStores::in_memory(),
            Arc::new(TcpPeerClient::new(network())),
        ));
        let server = spawn_server(listener, ctx.clone());
        self.running.lock().insert(node.addr(), (ctx, server));
        Ok(())
    }
}

pub type TestOrchestrator = Orchestrator<InProcessLauncher, TcpCommander>;

pub struct Cluster {
    pub orch: Arc<TestOrchestrator>,
    pub launcher: Arc<InProcessLauncher>,
    pub inbox: Arc<RecoveryInbox>,
    pub cancel: CancellationToken,
}

impl Cluster {
    /// Orchestrator over a roster of `candidates` with a live recovery
    /// listener. Nothing is launched yet.
    pub async fn new(candidates: usize) -> Self {
        let (launcher, roster) = InProcessLauncher::reserve(candidates).await;
        let recovery = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let recovery_port = recovery.local_addr().unwrap().port();
        let inbox = Arc::new(RecoveryInbox::new());
        let cancel = CancellationToken::new();
        spawn_recovery_listener(recovery, inbox.clone(), cancel.child_token());

        let settings = OrchestratorSettings {
            recovery: RecoveryEndpoint::new("127.0.0.1", recovery_port),
            identify_attempts: 20,
            identify_backoff: Duration::from_millis(25),
            default_cache: CacheConfig::default(),
        };
        let orch = Arc::new(Orchestrator::new(
            settings,
            roster,
            launcher.clone(),
            Arc::new(TcpCommander::new(network())),
        ));
        Self {
            orch,
            launcher,
            inbox,
            cancel,
        }
    }

    /// `new` + init + start.
    pub async fn running(candidates: usize, nodes: usize) -> Self {
        let cluster = Self::new(candidates).await;
        cluster
            .orch
            .init_service(nodes, CacheConfig::new(8, "LRU"))
            .await
            .unwrap();
        assert_eq!(cluster.orch.start().await.unwrap(), nodes);
        cluster
    }

    /// Ring members that are still running.
    pub async fn members(&self) -> Vec<(RingEntry, Ctx)> {
        self.orch
            .ring()
            .await
            .iter()
            .filter_map(|e| self.launcher.node(e).map(|ctx| (e.clone(), ctx)))
            .collect()
    }

    pub async fn client(&self, user: &str) -> KvClient {
        let ring = self.orch.ring().await;
        let entry = ring.entries()[0].addr();
        let mut client = KvClient::connect(&entry, network()).await.unwrap();
        client.sign_up(user, "secret").await.unwrap();
        client
    }

    /// A fresh client with the current ring, logged in on any member that
    /// knows the account.
    pub async fn login(&self, user: &str) -> KvClient {
        for entry in self.orch.ring().await.iter() {
            let mut client = KvClient::connect(&entry.addr(), network()).await.unwrap();
            let reply = client.login(user, "secret").await.unwrap();
            if client.username() == Some(user) {
                return client;
            }
            tracing::debug!("{} does not know {}: {:?}", entry, user, reply.status);
        }
        panic!("no member knows {}", user);
    }

    /// Every key lives in the primary store of its owner and nowhere else.
    pub async fn assert_placement(&self, keys: &[String]) {
        let ring = self.orch.ring().await;
        let members = self.members().await;
        assert_eq!(members.len(), ring.len(), "a ring member is not running");
        for key in keys {
            let owner = ring.route(key).unwrap();
            for (entry, ctx) in &members {
                let held = ctx.stores().primary.contains(key);
                if entry == owner {
                    assert!(held, "{} missing from its owner {}", key, entry);
                } else {
                    assert!(!held, "{} also held by non-owner {}", key, entry);
                }
            }
        }
    }

    pub async fn teardown(self) {
        self.cancel.cancel();
        self.launcher.kill_all().await;
    }
}
