//! ringkv-node: a single storage node.
//!
//! Launched by the orchestrator as
//! `ringkv-node <address> <port> <recovery_address> <recovery_port>`.
//! The node opens its stores, binds its port and waits for INIT/START from
//! the orchestrator before it serves clients.

use clap::Parser;
use ringkv_config::NodeConfig;
use ringkv_kv::{NodeContext, NodeSettings};
use ringkv_net::TcpPeerClient;
use ringkv_storage::NodeStores;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ringkv-node", about = "ringkv storage node")]
struct Args {
    /// Address this node advertises on the ring.
    address: String,
    /// Port to listen on.
    port: u16,
    /// Host of the orchestrator's recovery listener.
    recovery_address: String,
    /// Port of the orchestrator's recovery listener.
    recovery_port: u16,
    /// Optional YAML config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> NodeConfig {
    let Some(path) = path else {
        return NodeConfig::default();
    };
    ringkv_config::load_from_file(path).unwrap_or_else(|e| {
        tracing::warn!(
            "failed to load config from {}: {}, using defaults",
            path.display(),
            e
        );
        NodeConfig::default()
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ringkv_metrics::init_tracing();

    let args = Args::parse();
    let config = load_config(args.config.as_ref());

    let stores = NodeStores::open(&config.data_dir, args.port)?;

    let mut settings = NodeSettings::new(
        args.address.clone(),
        args.port,
        format!("{}:{}", args.recovery_address, args.recovery_port),
    );
    settings.failure_detection_interval =
        Duration::from_secs(config.failure_detection_interval_secs);
    settings.replication_interval = Duration::from_secs(config.replication_interval_secs);
    settings.expiry_sweep_interval = Duration::from_millis(config.expiry_sweep_interval_ms);

    let peers = Arc::new(TcpPeerClient::new(config.network.clone()));
    let ctx = Arc::new(NodeContext::new(settings, stores, peers));

    let listener = TcpListener::bind((config.listen_host.as_str(), args.port)).await?;
    tracing::info!(
        "node {}:{} listening on {}, recovery at {}:{}",
        args.address,
        args.port,
        listener.local_addr()?,
        args.recovery_address,
        args.recovery_port
    );

    // Spawn metrics HTTP server if configured
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr = std::net::SocketAddr::from(([0, 0, 0, 0], metrics_port));
        tokio::spawn(async move {
            if let Err(e) = ringkv_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    let server = ringkv_net::spawn_server(listener, ctx.clone());

    tokio::select! {
        _ = ctx.shutdown_token().cancelled() => {
            tracing::info!("shutdown requested by orchestrator");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
            ctx.begin_shutdown();
        }
    }

    if let Err(e) = server.await {
        tracing::warn!("server task ended abnormally: {}", e);
    }
    ctx.finish_shutdown().await;
    Ok(())
}
