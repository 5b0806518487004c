//! Membership state machine.
//!
//! Every public operation takes the one membership lock for its whole
//! duration, so node launches, data hand-overs and ring broadcasts from
//! different operations (including recovery) never interleave.

use crate::commander::NodeCommander;
use crate::launcher::{NodeLauncher, RecoveryEndpoint};
use crate::OrchestratorError;
use ringkv_config::EcsConfig;
use ringkv_kv::convert::{ecs_command, init_request, move_data_command, update_command};
use ringkv_proto::{Message, StatusType};
use ringkv_ring::{HashRing, RingEntry, RingError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

/// Cache parameters a node was initialized with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub size: usize,
    pub policy: String,
}

impl CacheConfig {
    pub fn new(size: usize, policy: impl Into<String>) -> Self {
        Self {
            size,
            policy: policy.into(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(1, "FIFO")
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Handed to every launched node.
    pub recovery: RecoveryEndpoint,
    pub identify_attempts: u32,
    pub identify_backoff: Duration,
    /// Used by recovery for nodes with no recorded cache config.
    pub default_cache: CacheConfig,
}

impl OrchestratorSettings {
    /// `recovery_port` is the port the recovery listener actually bound.
    pub fn from_config(config: &EcsConfig, recovery_port: u16) -> Self {
        Self {
            recovery: RecoveryEndpoint::new(config.recovery_advertise_host.clone(), recovery_port),
            identify_attempts: config.identify_attempts,
            identify_backoff: Duration::from_millis(config.identify_backoff_ms),
            default_cache: CacheConfig::new(
                config.default_cache_size,
                config.default_cache_policy.clone(),
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Membership {
    /// Candidates not currently on the ring.
    pool: HashRing,
    ring: HashRing,
    caches: HashMap<RingEntry, CacheConfig>,
    initialized: bool,
    /// Set by `start`, cleared by `stop`; new members are started to match.
    serving: bool,
}

impl Membership {
    fn return_to_pool(&mut self, node: RingEntry) {
        if let Err(e) = self.pool.add(node) {
            tracing::warn!("could not return node to the pool: {}", e);
        }
    }
}

/// The controller. Generic over how nodes are launched and commanded.
pub struct Orchestrator<L: NodeLauncher, C: NodeCommander> {
    settings: OrchestratorSettings,
    launcher: Arc<L>,
    commander: Arc<C>,
    state: Mutex<Membership>,
}

impl<L: NodeLauncher, C: NodeCommander> std::fmt::Debug for Orchestrator<L, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<L: NodeLauncher, C: NodeCommander> Orchestrator<L, C> {
    /// `pool` is the full candidate roster; nothing is launched yet.
    pub fn new(
        settings: OrchestratorSettings,
        pool: HashRing,
        launcher: Arc<L>,
        commander: Arc<C>,
    ) -> Self {
        Self {
            settings,
            launcher,
            commander,
            state: Mutex::new(Membership {
                pool,
                ..Membership::default()
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Snapshot of the authoritative ring.
    pub async fn ring(&self) -> HashRing {
        self.state.lock().await.ring.clone()
    }

    /// Snapshot of the candidates not on the ring.
    pub async fn pool(&self) -> HashRing {
        self.state.lock().await.pool.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    pub async fn cache_config(&self, node: &RingEntry) -> Option<CacheConfig> {
        self.state.lock().await.caches.get(node).cloned()
    }

    // -----------------------------------------------------------------------
    // Operator commands
    // -----------------------------------------------------------------------

    /// Launch `n` random candidates and initialize them as one ring.
    ///
    /// Nodes that fail to launch or identify go back to the pool and the
    /// ring is formed from the rest. Returns the new ring.
    pub async fn init_service(
        &self,
        n: usize,
        cache: CacheConfig,
    ) -> Result<HashRing, OrchestratorError> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Err(OrchestratorError::AlreadyInitialized);
        }
        let chosen = state.pool.pop(n).map_err(|e| match e {
            RingError::NotEnough {
                requested,
                available,
            } => OrchestratorError::NotEnoughCandidates {
                requested,
                available,
            },
            other => other.into(),
        })?;

        let mut ring = HashRing::new();
        for node in chosen.iter() {
            match self.bring_up(node).await {
                Ok(()) => ring.add(node.clone())?,
                Err(e) => {
                    tracing::error!("{} failed to start: {}", node, e);
                    state.return_to_pool(node.clone());
                }
            }
        }
        if ring.is_empty() {
            return Err(OrchestratorError::NothingStarted);
        }

        for node in ring.iter() {
            self.command(node, &init_request(node, &ring, cache.size, &cache.policy))
                .await;
            state.caches.insert(node.clone(), cache.clone());
        }
        state.ring = ring.clone();
        state.initialized = true;
        record_op("init_service");
        tracing::info!("service initialized with {} node(s)", ring.len());
        Ok(ring)
    }

    /// Broadcast START. Returns how many members acknowledged.
    pub async fn start(&self) -> Result<usize, OrchestratorError> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(OrchestratorError::NotInitialized);
        }
        state.serving = true;
        Ok(self
            .broadcast(&state.ring, |_| ecs_command(StatusType::Start))
            .await)
    }

    /// Broadcast STOP. Returns how many members acknowledged.
    pub async fn stop(&self) -> Result<usize, OrchestratorError> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(OrchestratorError::NotInitialized);
        }
        state.serving = false;
        Ok(self
            .broadcast(&state.ring, |_| ecs_command(StatusType::Stop))
            .await)
    }

    /// Shut every member down and return them all to the pool. The service
    /// can be initialized again afterwards.
    pub async fn shutdown(&self) -> Result<usize, OrchestratorError> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(OrchestratorError::NotInitialized);
        }
        let ring = std::mem::take(&mut state.ring);
        let acked = self
            .broadcast(&ring, |_| ecs_command(StatusType::Shutdown))
            .await;
        for node in ring.iter() {
            self.commander.disconnect(node).await;
        }
        state.pool.merge(ring);
        state.caches.clear();
        state.initialized = false;
        state.serving = false;
        record_op("shutdown");
        tracing::info!("service shut down, {} candidates in pool", state.pool.len());
        Ok(acked)
    }

    /// Launch one more node and hand it its range from its successor.
    pub async fn add_node(&self, cache: CacheConfig) -> Result<RingEntry, OrchestratorError> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(OrchestratorError::NotInitialized);
        }
        self.add_node_locked(&mut state, cache).await
    }

    /// Retire a random member. Its data moves to its former successor
    /// before it is shut down.
    pub async fn remove_node(&self) -> Result<RingEntry, OrchestratorError> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(OrchestratorError::NotInitialized);
        }
        match state.ring.len() {
            0 => return Err(OrchestratorError::EmptyRing),
            1 => return Err(OrchestratorError::LastNode),
            _ => {}
        }
        let popped = state.ring.pop_one()?;
        let node = popped.removed.clone();
        state.caches.remove(&node);
        state.return_to_pool(node.clone());

        self.command(&node, &ecs_command(StatusType::LockWrite))
            .await;
        self.command(
            &node,
            &move_data_command(&popped.predecessor, &popped.successor),
        )
        .await;
        self.command(&node, &ecs_command(StatusType::UnlockWrite))
            .await;
        self.command(&node, &ecs_command(StatusType::Shutdown))
            .await;
        self.commander.disconnect(&node).await;

        self.broadcast_ring(&state.ring).await;
        record_op("remove_node");
        tracing::info!(
            "removed {}, its data went to {}",
            node,
            popped.successor
        );
        Ok(node)
    }

    /// Send the current ring to every member.
    pub async fn broadcast_metatable(&self) -> usize {
        let state = self.state.lock().await;
        self.broadcast_ring(&state.ring).await
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Replace the reported nodes. Entries that are not members are ignored.
    ///
    /// The shrunken ring is broadcast first so the successors of the dead
    /// nodes promote their replicas, then one node is added per dead entry
    /// with the dead entry's cache config. Returns the added nodes.
    pub async fn recover(&self, dead: Vec<RingEntry>) -> Vec<RingEntry> {
        let mut state = self.state.lock().await;
        let mut configs = Vec::new();
        let mut removed = Vec::new();
        for node in dead {
            if state.ring.remove(&node).is_none() {
                tracing::debug!("ignoring report for non-member {}", node);
                continue;
            }
            let cache = state
                .caches
                .remove(&node)
                .unwrap_or_else(|| self.settings.default_cache.clone());
            self.commander.disconnect(&node).await;
            tracing::warn!("{} is dead, replacing it", node);
            configs.push(cache);
            removed.push(node);
        }
        if configs.is_empty() {
            return Vec::new();
        }
        self.broadcast_ring(&state.ring).await;

        let mut added = Vec::new();
        for cache in configs {
            match self.add_node_locked(&mut state, cache).await {
                Ok(node) => added.push(node),
                Err(e) => tracing::error!("recovery could not add a replacement: {}", e),
            }
        }
        // Dead entries rejoin the pool only after their replacements are
        // drawn, so a replacement is never the node that just died.
        for node in removed {
            state.return_to_pool(node);
        }
        record_op("recover");
        added
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn add_node_locked(
        &self,
        state: &mut Membership,
        cache: CacheConfig,
    ) -> Result<RingEntry, OrchestratorError> {
        let node = match state.pool.pop_one() {
            Ok(popped) => popped.removed,
            Err(_) => return Err(OrchestratorError::PoolExhausted),
        };
        if let Err(e) = state.ring.add(node.clone()) {
            state.return_to_pool(node);
            return Err(e.into());
        }
        let predecessor = state.ring.predecessor(&node)?.clone();
        let successor = state.ring.successor(&node)?.clone();

        if let Err(e) = self.bring_up(&node).await {
            state.ring.remove(&node);
            state.return_to_pool(node);
            return Err(e);
        }
        self.command(
            &node,
            &init_request(&node, &state.ring, cache.size, &cache.policy),
        )
        .await;
        state.caches.insert(node.clone(), cache);
        if state.serving {
            self.command(&node, &ecs_command(StatusType::Start)).await;
        }

        // The successor gives up (predecessor, node] before anyone else
        // learns about the new member.
        if successor != node {
            self.command(&successor, &ecs_command(StatusType::LockWrite))
                .await;
            self.command(&successor, &move_data_command(&predecessor, &node))
                .await;
            self.command(&successor, &ecs_command(StatusType::UnlockWrite))
                .await;
        }

        self.broadcast_ring(&state.ring).await;
        record_op("add_node");
        tracing::info!("added {} between {} and {}", node, predecessor, successor);
        Ok(node)
    }

    async fn bring_up(&self, node: &RingEntry) -> Result<(), OrchestratorError> {
        self.launcher.launch(node, &self.settings.recovery).await?;
        self.identify_with_retry(node).await
    }

    /// A freshly launched node may not be listening yet.
    async fn identify_with_retry(&self, node: &RingEntry) -> Result<(), OrchestratorError> {
        let attempts = self.settings.identify_attempts;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.commander.connect(node).await {
                Ok(()) => {
                    tracing::debug!("{} identified after {} attempt(s)", node, attempt);
                    return Ok(());
                }
                Err(e) if attempt >= attempts => {
                    return Err(OrchestratorError::Unreachable {
                        node: node.to_string(),
                        attempts,
                        source: e,
                    })
                }
                Err(e) => {
                    tracing::trace!("{} not ready ({}/{}): {}", node, attempt, attempts, e);
                    tokio::time::sleep(self.settings.identify_backoff).await;
                }
            }
        }
    }

    /// Send one command. Failures are logged and reported as `None`; a
    /// non-DONE reply is logged and returned.
    async fn command(&self, node: &RingEntry, msg: &Message) -> Option<Message> {
        match self.commander.send(node, msg).await {
            Ok(reply) => {
                let text = reply_text(&reply);
                if reply.status == StatusType::Done {
                    tracing::info!("{} {}: {}", node, msg.status, text);
                } else {
                    tracing::warn!("{} {} -> {}: {}", node, msg.status, reply.status, text);
                }
                Some(reply)
            }
            Err(e) => {
                tracing::warn!("{} {} failed: {}", node, msg.status, e);
                None
            }
        }
    }

    async fn broadcast_ring(&self, ring: &HashRing) -> usize {
        let update = update_command(ring);
        self.broadcast(ring, |_| update.clone()).await
    }

    /// Send a command to each member in ring order; counts DONE replies.
    async fn broadcast<F>(&self, ring: &HashRing, make: F) -> usize
    where
        F: Fn(&RingEntry) -> Message,
    {
        let mut acked = 0;
        for node in ring.iter() {
            if let Some(reply) = self.command(node, &make(node)).await {
                if reply.status == StatusType::Done {
                    acked += 1;
                }
            }
        }
        acked
    }
}

fn reply_text(reply: &Message) -> &str {
    reply
        .first()
        .and_then(|kv| kv.value_str())
        .unwrap_or_default()
}

fn record_op(op: &str) {
    ringkv_metrics::metrics()
        .membership_ops
        .with_label_values(&[op])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::LaunchError;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use ringkv_kv::convert::{parse_init, parse_move_data_command, parse_update};
    use ringkv_net::NetError;
    use ringkv_proto::Source;
    use std::collections::HashSet;

    #[derive(Default)]
    struct StubLauncher {
        launched: SyncMutex<Vec<RingEntry>>,
        broken: SyncMutex<HashSet<String>>,
    }

    #[async_trait]
    impl NodeLauncher for StubLauncher {
        async fn launch(
            &self,
            node: &RingEntry,
            _recovery: &RecoveryEndpoint,
        ) -> Result<(), LaunchError> {
            if self.broken.lock().contains(&node.addr()) {
                return Err(LaunchError::Spawn {
                    node: node.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such host"),
                });
            }
            self.launched.lock().push(node.clone());
            Ok(())
        }
    }

    /// Answers every command with DONE and records what was sent.
    #[derive(Default)]
    struct RecordingCommander {
        sent: SyncMutex<Vec<(RingEntry, Message)>>,
        connects: SyncMutex<Vec<RingEntry>>,
        disconnected: SyncMutex<Vec<RingEntry>>,
        /// Connect attempts that fail before the node answers.
        slow_starts: SyncMutex<HashMap<String, u32>>,
    }

    impl RecordingCommander {
        fn sent_to(&self, node: &RingEntry) -> Vec<Message> {
            self.sent
                .lock()
                .iter()
                .filter(|(n, _)| n == node)
                .map(|(_, m)| m.clone())
                .collect()
        }

        fn statuses(&self) -> Vec<(RingEntry, StatusType)> {
            self.sent
                .lock()
                .iter()
                .map(|(n, m)| (n.clone(), m.status))
                .collect()
        }
    }

    #[async_trait]
    impl NodeCommander for RecordingCommander {
        async fn connect(&self, node: &RingEntry) -> Result<(), NetError> {
            self.connects.lock().push(node.clone());
            let mut slow = self.slow_starts.lock();
            if let Some(left) = slow.get_mut(&node.addr()) {
                if *left > 0 {
                    *left -= 1;
                    return Err(NetError::Closed);
                }
            }
            Ok(())
        }

        async fn send(&self, node: &RingEntry, msg: &Message) -> Result<Message, NetError> {
            self.sent.lock().push((node.clone(), msg.clone()));
            Ok(Message::text(Source::Server, StatusType::Done, "ok"))
        }

        async fn disconnect(&self, node: &RingEntry) {
            self.disconnected.lock().push(node.clone());
        }
    }

    fn roster(n: u16) -> HashRing {
        HashRing::from_entries(
            (0..n).map(|i| RingEntry::new(format!("node{}", i), "127.0.0.1", 50000 + i)),
        )
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            recovery: RecoveryEndpoint::new("127.0.0.1", 4999),
            identify_attempts: 3,
            identify_backoff: Duration::from_millis(1),
            default_cache: CacheConfig::default(),
        }
    }

    type TestOrchestrator = Orchestrator<StubLauncher, RecordingCommander>;

    fn orchestrator(
        pool: u16,
    ) -> (
        TestOrchestrator,
        Arc<StubLauncher>,
        Arc<RecordingCommander>,
    ) {
        let launcher = Arc::new(StubLauncher::default());
        let commander = Arc::new(RecordingCommander::default());
        let orch = Orchestrator::new(settings(), roster(pool), launcher.clone(), commander.clone());
        (orch, launcher, commander)
    }

    #[tokio::test]
    async fn test_init_service_launches_and_inits() {
        let (orch, launcher, commander) = orchestrator(5);
        let ring = orch.init_service(3, CacheConfig::new(10, "LRU")).await.unwrap();
        assert_eq!(ring.len(), 3);
        assert_eq!(orch.pool().await.len(), 2);
        assert_eq!(launcher.launched.lock().len(), 3);

        for node in ring.iter() {
            let msgs = commander.sent_to(node);
            assert_eq!(msgs.len(), 1);
            let init = parse_init(&msgs[0]).unwrap();
            assert_eq!(&init.target, node);
            assert_eq!(init.ring.entries(), ring.entries());
            assert_eq!(init.cache_size, 10);
            assert_eq!(init.strategy, "LRU");
            assert_eq!(
                orch.cache_config(node).await,
                Some(CacheConfig::new(10, "LRU"))
            );
        }
        assert!(matches!(
            orch.init_service(1, CacheConfig::default()).await,
            Err(OrchestratorError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_init_service_more_than_pool_launches_nothing() {
        let (orch, launcher, _) = orchestrator(2);
        let err = orch.init_service(3, CacheConfig::default()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::NotEnoughCandidates {
                requested: 3,
                available: 2
            }
        ));
        assert!(launcher.launched.lock().is_empty());
        assert_eq!(orch.pool().await.len(), 2);
        assert!(!orch.is_initialized().await);
    }

    #[tokio::test]
    async fn test_identify_retries_until_node_answers() {
        let (orch, _, commander) = orchestrator(1);
        let only = roster(1).entries()[0].clone();
        commander.slow_starts.lock().insert(only.addr(), 2);
        orch.init_service(1, CacheConfig::default()).await.unwrap();
        assert_eq!(commander.connects.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_node_returns_to_pool() {
        let (orch, _, commander) = orchestrator(2);
        let all = roster(2);
        let bad = all.entries()[0].clone();
        commander.slow_starts.lock().insert(bad.addr(), 10);

        let ring = orch.init_service(2, CacheConfig::default()).await.unwrap();
        assert_eq!(ring.len(), 1);
        assert!(!ring.contains(&bad));
        assert!(orch.pool().await.contains(&bad));
    }

    #[tokio::test]
    async fn test_failed_launch_of_every_node() {
        let (orch, launcher, _) = orchestrator(1);
        launcher
            .broken
            .lock()
            .insert(roster(1).entries()[0].addr());
        assert!(matches!(
            orch.init_service(1, CacheConfig::default()).await,
            Err(OrchestratorError::NothingStarted)
        ));
        assert_eq!(orch.pool().await.len(), 1);
        assert!(!orch.is_initialized().await);
    }

    #[tokio::test]
    async fn test_commands_require_init() {
        let (orch, _, _) = orchestrator(3);
        assert!(matches!(orch.start().await, Err(OrchestratorError::NotInitialized)));
        assert!(matches!(orch.stop().await, Err(OrchestratorError::NotInitialized)));
        assert!(matches!(
            orch.add_node(CacheConfig::default()).await,
            Err(OrchestratorError::NotInitialized)
        ));
        assert!(matches!(
            orch.remove_node().await,
            Err(OrchestratorError::NotInitialized)
        ));
        assert!(matches!(orch.shutdown().await, Err(OrchestratorError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_add_node_hands_over_from_successor_before_broadcast() {
        let (orch, _, commander) = orchestrator(6);
        orch.init_service(3, CacheConfig::default()).await.unwrap();
        orch.start().await.unwrap();
        commander.sent.lock().clear();

        let node = orch.add_node(CacheConfig::new(4, "LFU")).await.unwrap();
        let ring = orch.ring().await;
        assert_eq!(ring.len(), 4);
        let pred = ring.predecessor(&node).unwrap().clone();
        let succ = ring.successor(&node).unwrap().clone();

        let statuses = commander.statuses();
        let expected_head = vec![
            (node.clone(), StatusType::Init),
            (node.clone(), StatusType::Start),
            (succ.clone(), StatusType::LockWrite),
            (succ.clone(), StatusType::MoveData),
            (succ.clone(), StatusType::UnlockWrite),
        ];
        assert_eq!(statuses[..5], expected_head[..]);
        // Then one UPDATE per member.
        assert_eq!(statuses.len(), 5 + 4);
        assert!(statuses[5..].iter().all(|(_, s)| *s == StatusType::Update));

        let moves = commander.sent_to(&succ);
        let mv = moves.iter().find(|m| m.status == StatusType::MoveData).unwrap();
        let (from, to) = parse_move_data_command(mv).unwrap();
        assert_eq!(from, pred);
        assert_eq!(to, node);

        let update = moves.iter().find(|m| m.status == StatusType::Update).unwrap();
        assert_eq!(parse_update(update).unwrap().entries(), ring.entries());
    }

    #[tokio::test]
    async fn test_add_node_when_stopped_does_not_start_it() {
        let (orch, _, commander) = orchestrator(3);
        orch.init_service(1, CacheConfig::default()).await.unwrap();
        let node = orch.add_node(CacheConfig::default()).await.unwrap();
        assert!(!commander
            .sent_to(&node)
            .iter()
            .any(|m| m.status == StatusType::Start));
    }

    #[tokio::test]
    async fn test_add_node_with_empty_pool() {
        let (orch, _, _) = orchestrator(2);
        orch.init_service(2, CacheConfig::default()).await.unwrap();
        assert!(matches!(
            orch.add_node(CacheConfig::default()).await,
            Err(OrchestratorError::PoolExhausted)
        ));
        assert_eq!(orch.ring().await.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_node_sequence() {
        let (orch, _, commander) = orchestrator(4);
        orch.init_service(4, CacheConfig::default()).await.unwrap();
        let before = orch.ring().await;
        commander.sent.lock().clear();

        let removed = orch.remove_node().await.unwrap();
        let pred = before.predecessor(&removed).unwrap().clone();
        let succ = before.successor(&removed).unwrap().clone();

        let to_removed: Vec<_> = commander
            .sent_to(&removed)
            .iter()
            .map(|m| m.status)
            .collect();
        assert_eq!(
            to_removed,
            vec![
                StatusType::LockWrite,
                StatusType::MoveData,
                StatusType::UnlockWrite,
                StatusType::Shutdown
            ]
        );
        let mv = commander
            .sent_to(&removed)
            .into_iter()
            .find(|m| m.status == StatusType::MoveData)
            .unwrap();
        assert_eq!(parse_move_data_command(&mv).unwrap(), (pred, succ));

        assert!(commander.disconnected.lock().contains(&removed));
        assert!(orch.pool().await.contains(&removed));
        assert!(orch.cache_config(&removed).await.is_none());
        let after = orch.ring().await;
        assert_eq!(after.len(), 3);
        for node in after.iter() {
            let update = commander
                .sent_to(node)
                .into_iter()
                .find(|m| m.status == StatusType::Update)
                .unwrap();
            assert_eq!(parse_update(&update).unwrap().entries(), after.entries());
        }
    }

    #[tokio::test]
    async fn test_remove_last_node_is_refused() {
        let (orch, _, _) = orchestrator(2);
        orch.init_service(1, CacheConfig::default()).await.unwrap();
        assert!(matches!(
            orch.remove_node().await,
            Err(OrchestratorError::LastNode)
        ));
        assert_eq!(orch.ring().await.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_returns_everyone_to_pool() {
        let (orch, _, commander) = orchestrator(4);
        orch.init_service(3, CacheConfig::default()).await.unwrap();
        let acked = orch.shutdown().await.unwrap();
        assert_eq!(acked, 3);
        assert!(orch.ring().await.is_empty());
        assert_eq!(orch.pool().await.len(), 4);
        assert_eq!(commander.disconnected.lock().len(), 3);
        // Initializable again.
        orch.init_service(2, CacheConfig::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_recover_replaces_dead_with_recorded_config() {
        let (orch, _, commander) = orchestrator(5);
        orch.init_service(3, CacheConfig::new(7, "LRU")).await.unwrap();
        let dead = orch.ring().await.entries()[1].clone();
        let stranger = RingEntry::new("ghost", "10.9.9.9", 1);
        commander.sent.lock().clear();

        let added = orch.recover(vec![dead.clone(), stranger]).await;
        assert_eq!(added.len(), 1);
        assert_ne!(added[0], dead);
        assert!(orch.pool().await.contains(&dead));
        let ring = orch.ring().await;
        assert_eq!(ring.len(), 3);
        assert!(ring.contains(&added[0]));

        // The shrunken ring goes out before the replacement is launched.
        let statuses = commander.statuses();
        assert_eq!(statuses[0].1, StatusType::Update);
        assert_eq!(statuses[1].1, StatusType::Update);
        assert_eq!(statuses[2], (added[0].clone(), StatusType::Init));
        let init = parse_init(&commander.sent_to(&added[0])[0]).unwrap();
        assert_eq!(init.cache_size, 7);
        assert_eq!(init.strategy, "LRU");
    }

    #[tokio::test]
    async fn test_recover_unknown_config_uses_default() {
        let (orch, _, commander) = orchestrator(3);
        orch.init_service(2, CacheConfig::new(9, "LFU")).await.unwrap();
        let dead = orch.ring().await.entries()[0].clone();
        orch.state.lock().await.caches.remove(&dead);

        let added = orch.recover(vec![dead]).await;
        assert_eq!(added.len(), 1);
        let init = parse_init(&commander.sent_to(&added[0])[0]).unwrap();
        assert_eq!(init.cache_size, 1);
        assert_eq!(init.strategy, "FIFO");
    }

    #[tokio::test]
    async fn test_recover_non_members_is_noop() {
        let (orch, _, commander) = orchestrator(3);
        orch.init_service(2, CacheConfig::default()).await.unwrap();
        commander.sent.lock().clear();
        let added = orch
            .recover(vec![RingEntry::new("ghost", "10.9.9.9", 1)])
            .await;
        assert!(added.is_empty());
        assert!(commander.sent.lock().is_empty());
    }
}
