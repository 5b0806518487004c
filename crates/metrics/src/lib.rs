//! Metrics and tracing setup for ringkv.
//!
//! Provides a global [`NodeMetrics`] singleton backed by the `prometheus`
//! crate, plus an optional lightweight HTTP server for Prometheus scraping.
//! Nodes and the orchestrator share the same registry layout; each process
//! simply leaves the other side's series at zero.

use prometheus::{
    Encoder, HistogramOpts, HistogramTimer, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// Global metrics instance.
static METRICS: OnceLock<NodeMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static NodeMetrics {
    METRICS.get_or_init(NodeMetrics::new)
}

/// All Prometheus metrics for a ringkv process.
pub struct NodeMetrics {
    pub registry: Registry,

    // ── Request handling ──
    pub requests_by_status: IntCounterVec,
    pub responses_by_status: IntCounterVec,
    pub request_latency_secs: HistogramVec,

    // ── Peer traffic ──
    pub peer_requests_sent: IntCounterVec,
    pub peer_request_failures: IntCounterVec,

    // ── Cache ──
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,

    // ── Background loops ──
    pub replication_pushes: IntCounter,
    pub replication_failures: IntCounter,
    pub dead_peers_reported: IntCounter,
    pub records_expired: IntCounter,

    // ── Orchestrator ──
    pub membership_ops: IntCounterVec,

    // ── Persistence ──
    pub snapshot_flushes: IntCounter,
    pub snapshot_flush_failures: IntCounter,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for NodeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMetrics").finish_non_exhaustive()
    }
}

/// Default histogram buckets (seconds) for request latency.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let c = IntCounter::with_opts(Opts::new(name, help)).expect("counter opts");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let c = IntCounterVec::new(Opts::new(name, help), labels).expect("counter vec opts");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter vec");
    c
}

impl NodeMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let request_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "ringkv_request_latency_seconds",
                "Inbound request handling latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["status"],
        )
        .expect("request_latency_secs histogram");
        registry
            .register(Box::new(request_latency_secs.clone()))
            .expect("register request_latency_secs");

        Self {
            requests_by_status: counter_vec(
                &registry,
                "ringkv_requests_total",
                "Inbound requests, by status",
                &["status"],
            ),
            responses_by_status: counter_vec(
                &registry,
                "ringkv_responses_total",
                "Responses sent, by status",
                &["status"],
            ),
            request_latency_secs,
            peer_requests_sent: counter_vec(
                &registry,
                "ringkv_peer_requests_sent_total",
                "Outbound requests to nodes, by status",
                &["status"],
            ),
            peer_request_failures: counter_vec(
                &registry,
                "ringkv_peer_request_failures_total",
                "Outbound requests that failed or timed out, by status",
                &["status"],
            ),
            cache_hits: counter(&registry, "ringkv_cache_hits_total", "Cache hits"),
            cache_misses: counter(&registry, "ringkv_cache_misses_total", "Cache misses"),
            replication_pushes: counter(
                &registry,
                "ringkv_replication_pushes_total",
                "Partition pushes to successors",
            ),
            replication_failures: counter(
                &registry,
                "ringkv_replication_failures_total",
                "Partition pushes that failed",
            ),
            dead_peers_reported: counter(
                &registry,
                "ringkv_dead_peers_reported_total",
                "Peers reported dead to the orchestrator",
            ),
            records_expired: counter(
                &registry,
                "ringkv_records_expired_total",
                "Records removed by the expiry sweep",
            ),
            membership_ops: counter_vec(
                &registry,
                "ringkv_membership_ops_total",
                "Orchestrator membership operations, by kind",
                &["op"],
            ),
            snapshot_flushes: counter(
                &registry,
                "ringkv_snapshot_flushes_total",
                "Snapshot files written",
            ),
            snapshot_flush_failures: counter(
                &registry,
                "ringkv_snapshot_flush_failures_total",
                "Snapshot writes that failed",
            ),
            registry,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

/// Helper: start a request latency timer. Returns a guard that records
/// elapsed time on drop.
pub fn start_request_timer(status: &str) -> HistogramTimer {
    metrics()
        .request_latency_secs
        .with_label_values(&[status])
        .start_timer()
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let body = encode_metrics();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid HTTP response"))
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// This spawns a lightweight HTTP/1.1 server. Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────
