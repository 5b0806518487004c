//! Integration tests: real nodes on 127.0.0.1 ephemeral ports, driven over
//! TCP by a controller connection and by `KvClient`.

use ringkv_config::NetworkConfig;
use ringkv_kv::convert::{ecs_command, init_request, parse_dead_server, update_command};
use ringkv_kv::failure_detector::detect_failures;
use ringkv_kv::replication::replicate_once;
use ringkv_kv::{NodeContext, NodeSettings, NodeStatus};
use ringkv_net::{spawn_server, Connection, KvClient, NetError, TcpPeerClient};
use ringkv_proto::{Message, Source, StatusType};
use ringkv_ring::{HashRing, RingEntry};
use ringkv_storage::{NodeStores, ReplicaSlot};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

struct TestNode {
    entry: RingEntry,
    ctx: Arc<NodeContext<TcpPeerClient>>,
    dir: TempDir,
    server: JoinHandle<()>,
}

fn network() -> NetworkConfig {
    NetworkConfig {
        connect_timeout_ms: 1000,
        request_timeout_ms: 3000,
    }
}

async fn spawn_node(name: &str, recovery_addr: &str) -> TestNode {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let dir = TempDir::new().unwrap();
    let stores = NodeStores::open(dir.path(), port).unwrap();
    let ctx = Arc::new(NodeContext::new(
        NodeSettings::new("127.0.0.1", port, recovery_addr),
        stores,
        Arc::new(TcpPeerClient::new(network())),
    ));
    let server = spawn_server(listener, ctx.clone());
    TestNode {
        entry: RingEntry::new(name, "127.0.0.1", port),
        ctx,
        dir,
        server,
    }
}

async fn controller(node: &TestNode) -> Connection {
    let mut conn = Connection::connect(&node.entry.addr(), Duration::from_secs(1))
        .await
        .unwrap();
    let greeting = conn
        .identify(Source::Ecs, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(greeting.status, StatusType::Info);
    assert_eq!(
        greeting.first().unwrap().value_str(),
        Some("Finish starting server")
    );
    conn
}

async fn command(conn: &mut Connection, msg: Message) -> Message {
    conn.request(&msg, Duration::from_secs(3)).await.unwrap()
}

/// Start `names.len()` nodes, INIT them with the full ring and START them.
async fn start_cluster(names: &[&str]) -> (Vec<TestNode>, Vec<Connection>, HashRing) {
    let mut nodes = Vec::new();
    for name in names {
        nodes.push(spawn_node(name, "127.0.0.1:1").await);
    }
    let ring = HashRing::from_entries(nodes.iter().map(|n| n.entry.clone()));
    let mut conns = Vec::new();
    for node in &nodes {
        let mut conn = controller(node).await;
        let r = command(&mut conn, init_request(&node.entry, &ring, 4, "LRU")).await;
        assert_eq!(r.status, StatusType::Done);
        let r = command(&mut conn, ecs_command(StatusType::Start)).await;
        assert_eq!(r.status, StatusType::Done);
        conns.push(conn);
    }
    (nodes, conns, ring)
}

// ────────────────────────── Handshake ──────────────────────────

#[tokio::test]
async fn test_client_rejected_before_start() {
    let node = spawn_node("solo", "127.0.0.1:1").await;
    match KvClient::connect(&node.entry.addr(), network()).await {
        Err(NetError::Rejected(reason)) => {
            assert!(reason.contains("SERVER_STOPPED"), "{}", reason)
        }
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }

    let mut conn = controller(&node).await;
    let again = command(&mut conn, Message::empty(Source::Ecs, StatusType::Identify)).await;
    assert_eq!(again.status, StatusType::Info);
    assert_eq!(again.first().unwrap().value_str(), Some("Already identified"));
}

// ────────────────────────── Client operations ──────────────────────────

#[tokio::test]
async fn test_single_node_end_to_end() {
    let (nodes, mut conns, ring) = start_cluster(&["solo"]).await;
    let addr = nodes[0].entry.addr();

    let mut client = KvClient::connect(&addr, network()).await.unwrap();
    assert_eq!(client.ring().to_text(), ring.to_text());

    let r = client.put("k", "v").await.unwrap();
    assert_eq!(r.status, StatusType::Fail);

    let r = client.sign_up("alice", "secret").await.unwrap();
    assert_eq!(r.status, StatusType::SignUpSuccess);
    assert_eq!(client.username(), Some("alice"));

    let r = client.put("k", "v").await.unwrap();
    assert_eq!(r.status, StatusType::PutSuccess);
    let r = client.get("k").await.unwrap();
    assert_eq!(r.status, StatusType::GetSuccess);
    assert_eq!(r.first().unwrap().value_str(), Some("v"));

    let r = command(&mut conns[0], ecs_command(StatusType::Stop)).await;
    assert_eq!(r.status, StatusType::Done);
    let r = client.get("k").await.unwrap();
    assert_eq!(r.status, StatusType::ServerStopped);

    let r = command(&mut conns[0], ecs_command(StatusType::Start)).await;
    assert_eq!(r.status, StatusType::Done);
    let r = client.delete("k").await.unwrap();
    assert_eq!(r.status, StatusType::DeleteSuccess);
    assert_eq!(r.first().unwrap().value_str(), Some("v"));
    let r = client.get("k").await.unwrap();
    assert_eq!(r.status, StatusType::GetError);
}

#[tokio::test]
async fn test_timed_put_expires_over_the_wire() {
    let (nodes, _conns, _ring) = start_cluster(&["solo"]).await;
    let mut client = KvClient::connect(&nodes[0].entry.addr(), network())
        .await
        .unwrap();
    client.sign_up("alice", "pw").await.unwrap();

    let r = client
        .timed_put("t", "v", Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(r.status, StatusType::TimedPutSuccess);
    assert_eq!(client.get("t").await.unwrap().status, StatusType::GetSuccess);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(client.get("t").await.unwrap().status, StatusType::GetError);
}

#[tokio::test]
async fn test_client_routes_across_nodes() {
    let (nodes, _conns, ring) = start_cluster(&["a", "b", "c"]).await;
    let mut client = KvClient::connect(&nodes[0].entry.addr(), network())
        .await
        .unwrap();
    client.sign_up("alice", "pw").await.unwrap();

    for i in 0..30 {
        let key = format!("key{}", i);
        let r = client.put(&key, "v").await.unwrap();
        assert_eq!(r.status, StatusType::PutSuccess, "key {}", key);
    }
    for node in &nodes {
        for record in node.ctx.stores().primary.records() {
            assert_eq!(ring.route(&record.key).unwrap(), &node.entry);
        }
    }

    // Accounts reached every node.
    for node in &nodes {
        assert!(node.ctx.stores().accounts.authenticate("alice", "pw"));
    }
}

#[tokio::test]
async fn test_non_owner_replies_with_ring() {
    let (nodes, _conns, ring) = start_cluster(&["a", "b", "c", "d", "e"]).await;
    let key = "some-key";
    let owner = ring.route(key).unwrap().clone();
    let other = nodes.iter().find(|n| n.entry != owner).unwrap();

    let mut conn = Connection::connect(&other.entry.addr(), Duration::from_secs(1))
        .await
        .unwrap();
    conn.identify(Source::Client, Duration::from_secs(1))
        .await
        .unwrap();
    let put = Message::client(StatusType::Put, Some("alice"), None, key, Some("v".into()));
    let r = conn.request(&put, Duration::from_secs(3)).await.unwrap();
    assert_eq!(r.status, StatusType::ServerNotResponsible);
    let meta = r.value_of("meta").unwrap();
    assert_eq!(HashRing::from_text(meta).unwrap().len(), 5);
}

#[tokio::test]
async fn test_client_adopts_ring_and_retries() {
    let (nodes, mut conns, ring) = start_cluster(&["a", "b", "c"]).await;
    let mut client = KvClient::connect(&nodes[0].entry.addr(), network())
        .await
        .unwrap();
    client.sign_up("alice", "pw").await.unwrap();

    // Drop the last node from everyone's ring behind the client's back.
    let gone = ring.entries()[2].clone();
    let mut shrunk = ring.clone();
    shrunk.remove(&gone);
    for conn in conns.iter_mut() {
        let r = command(conn, update_command(&shrunk)).await;
        assert_eq!(r.status, StatusType::Done);
    }

    let key = (0..1000)
        .map(|i| format!("key{}", i))
        .find(|k| ring.route(k).unwrap() == &gone)
        .unwrap();
    let r = client.put(&key, "v").await.unwrap();
    assert_eq!(r.status, StatusType::PutSuccess);
    assert_eq!(client.ring().len(), 2);

    let heir = shrunk.route(&key).unwrap();
    let heir_node = nodes.iter().find(|n| &n.entry == heir).unwrap();
    assert!(heir_node.ctx.stores().primary.contains(&key));
}

// ────────────────────────── Peer traffic ──────────────────────────

#[tokio::test]
async fn test_replication_over_tcp() {
    let (nodes, _conns, ring) = start_cluster(&["a", "b", "c"]).await;
    let mut client = KvClient::connect(&nodes[0].entry.addr(), network())
        .await
        .unwrap();
    client.sign_up("alice", "pw").await.unwrap();
    for i in 0..30 {
        client.put(&format!("key{}", i), "v").await.unwrap();
    }

    for node in &nodes {
        replicate_once(&node.ctx).await;
    }
    let find = |e: &RingEntry| nodes.iter().find(|n| &n.entry == e).unwrap();
    for node in &nodes {
        let primary = node.ctx.stores().primary.records();
        if primary.is_empty() {
            continue;
        }
        let s1 = ring.successor(&node.entry).unwrap();
        let s2 = ring.successor(s1).unwrap();
        assert_eq!(
            find(s1).ctx.stores().replica(ReplicaSlot::First).records(),
            primary
        );
        assert_eq!(
            find(s2).ctx.stores().replica(ReplicaSlot::Second).records(),
            primary
        );
    }
}

/// Accepts reporter connections (IDENTIFY then DEAD_SERVER) and forwards
/// the reported entries.
async fn fake_recovery_listener() -> (String, mpsc::UnboundedReceiver<RingEntry>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut conn = Connection::new(stream, peer.to_string());
                while let Ok(Some(msg)) = conn.recv().await {
                    if msg.status == StatusType::DeadServer {
                        let _ = tx.send(parse_dead_server(&msg).unwrap());
                        let done = Message::text(Source::Ecs, StatusType::Done, "noted");
                        let _ = conn.send(&done).await;
                    }
                }
            });
        }
    });
    (addr, rx)
}

#[tokio::test]
async fn test_failure_detection_reports_shut_down_peer() {
    let (recovery, mut reports) = fake_recovery_listener().await;
    let a = spawn_node("a", &recovery).await;
    let b = spawn_node("b", &recovery).await;
    let ring = HashRing::from_entries([a.entry.clone(), b.entry.clone()]);
    for node in [&a, &b] {
        let mut conn = controller(node).await;
        command(&mut conn, init_request(&node.entry, &ring, 1, "FIFO")).await;
        command(&mut conn, ecs_command(StatusType::Start)).await;
    }

    assert!(detect_failures(&a.ctx).await.is_empty());

    let mut conn = controller(&b).await;
    let r = command(&mut conn, ecs_command(StatusType::Shutdown)).await;
    assert_eq!(r.status, StatusType::Done);
    assert_eq!(r.first().unwrap().value_str(), Some("Server Shutting down..."));
    b.server.await.unwrap();
    b.ctx.finish_shutdown().await;
    assert_eq!(b.ctx.status(), NodeStatus::Shutdown);

    let dead = detect_failures(&a.ctx).await;
    assert_eq!(dead, vec![b.entry.clone()]);
    let reported = tokio::time::timeout(Duration::from_secs(2), reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reported, b.entry);
}

// ────────────────────────── Robustness ──────────────────────────

#[tokio::test]
async fn test_protocol_violation_closes_connection() {
    let node = spawn_node("solo", "127.0.0.1:1").await;
    let mut stream = TcpStream::connect(node.entry.addr()).await.unwrap();
    // len=12, source=CLIENT, status=99 (unknown), pairCount=0
    let mut frame = Vec::new();
    for word in [12u32, 0, 99, 0] {
        frame.extend_from_slice(&word.to_be_bytes());
    }
    stream.write_all(&frame).await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_data_survives_restart() {
    let (nodes, mut conns, _ring) = start_cluster(&["solo"]).await;
    let mut client = KvClient::connect(&nodes[0].entry.addr(), network())
        .await
        .unwrap();
    client.sign_up("alice", "pw").await.unwrap();
    client.put("durable", "yes").await.unwrap();

    command(&mut conns[0], ecs_command(StatusType::Shutdown)).await;
    let node = nodes.into_iter().next().unwrap();
    node.server.await.unwrap();
    node.ctx.finish_shutdown().await;

    let reopened = NodeStores::open(node.dir.path(), node.entry.port).unwrap();
    assert_eq!(reopened.primary.get("durable").unwrap().value, "yes");
    assert!(reopened.accounts.authenticate("alice", "pw"));
}
