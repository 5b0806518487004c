//! ringkv-ecs: the orchestrator binary.
//!
//! Loads the roster, starts the recovery listener and recovery loop, then
//! reads operator commands from stdin until `quit` or end of input.

use clap::Parser;
use ringkv_config::EcsConfig;
use ringkv_ecs::operator::{OperatorCommand, HELP};
use ringkv_ecs::recovery::{spawn_recovery_listener, spawn_recovery_loop};
use ringkv_ecs::roster::load_roster;
use ringkv_ecs::{
    CacheConfig, NodeCommander, NodeLauncher, Orchestrator, OrchestratorSettings,
    ProcessLauncher, RecoveryInbox, TcpCommander,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "ringkv-ecs", about = "ringkv cluster orchestrator")]
struct Args {
    /// Optional YAML config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> EcsConfig {
    let Some(path) = path else {
        return EcsConfig::default();
    };
    ringkv_config::load_from_file(path).unwrap_or_else(|e| {
        tracing::warn!(
            "failed to load config from {}: {}, using defaults",
            path.display(),
            e
        );
        EcsConfig::default()
    })
}

fn prompt() {
    print!("ECS> ");
    let _ = std::io::stdout().flush();
}

/// Run one operator command. Returns false when the operator quits.
async fn execute<L: NodeLauncher, C: NodeCommander>(
    orch: &Orchestrator<L, C>,
    line: &str,
) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    let command = match line.parse::<OperatorCommand>() {
        Ok(command) => command,
        Err(e) => {
            println!("{}", e);
            println!("{}", HELP);
            return true;
        }
    };
    tracing::info!("operator: {:?}", command);
    let started = Instant::now();
    match command {
        OperatorCommand::Init {
            nodes,
            cache_size,
            policy,
        } => match orch
            .init_service(nodes, CacheConfig::new(cache_size, policy))
            .await
        {
            Ok(ring) => println!(
                "Took {}ms to initialize {} node(s)",
                started.elapsed().as_millis(),
                ring.len()
            ),
            Err(e) => println!("init failed: {}", e),
        },
        OperatorCommand::Start => match orch.start().await {
            Ok(n) => println!("{} node(s) started", n),
            Err(e) => println!("start failed: {}", e),
        },
        OperatorCommand::Stop => match orch.stop().await {
            Ok(n) => println!("{} node(s) stopped", n),
            Err(e) => println!("stop failed: {}", e),
        },
        OperatorCommand::Add { cache_size, policy } => {
            match orch.add_node(CacheConfig::new(cache_size, policy)).await {
                Ok(node) => println!("Finished adding {}", node),
                Err(e) => println!("add failed: {}", e),
            }
        }
        OperatorCommand::Remove => match orch.remove_node().await {
            Ok(node) => println!("Removed {}", node),
            Err(e) => println!("remove failed: {}", e),
        },
        OperatorCommand::Shutdown => match orch.shutdown().await {
            Ok(n) => println!("Shut down {} node(s)", n),
            Err(e) => println!("shutdown failed: {}", e),
        },
        OperatorCommand::Help => println!("{}", HELP),
        OperatorCommand::Quit => return false,
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ringkv_metrics::init_tracing();

    let args = Args::parse();
    let config = load_config(args.config.as_ref());
    let pool = load_roster(&config.roster_path)?;

    let recovery_listener = TcpListener::bind(config.recovery_listen).await?;
    let recovery_port = recovery_listener.local_addr()?.port();
    tracing::info!("recovery listener on {}", recovery_listener.local_addr()?);

    let settings = OrchestratorSettings::from_config(&config, recovery_port);
    let orch = Arc::new(Orchestrator::new(
        settings,
        pool,
        Arc::new(ProcessLauncher::new(config.launch_command.clone())),
        Arc::new(TcpCommander::new(config.network.clone())),
    ));

    let inbox = Arc::new(RecoveryInbox::new());
    let cancel = CancellationToken::new();
    let listener_task =
        spawn_recovery_listener(recovery_listener, inbox.clone(), cancel.child_token());
    let recovery_task = spawn_recovery_loop(
        orch.clone(),
        inbox,
        Duration::from_secs(config.recovery_interval_secs),
        cancel.child_token(),
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

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !execute(&orch, &line).await {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received Ctrl+C");
                break;
            }
        }
    }

    if orch.is_initialized().await {
        tracing::info!("shutting down the service before exit");
        if let Err(e) = orch.shutdown().await {
            tracing::warn!("shutdown failed: {}", e);
        }
    }
    cancel.cancel();
    let _ = listener_task.await;
    let _ = recovery_task.await;
    Ok(())
}
