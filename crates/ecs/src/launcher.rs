//! Starting node processes.

use async_trait::async_trait;
use ringkv_ring::RingEntry;
use std::process::Stdio;
use tokio::process::Command;

/// Where launched nodes send their DEAD_SERVER reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryEndpoint {
    pub host: String,
    pub port: u16,
}

impl RecoveryEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("could not start {node}: {source}")]
    Spawn {
        node: String,
        #[source]
        source: std::io::Error,
    },
}

/// Brings a node up at the address and port named by its ring entry.
///
/// A successful launch only means the node was started; the orchestrator
/// still waits for the IDENTIFY handshake before talking to it.
#[async_trait]
pub trait NodeLauncher: Send + Sync + 'static {
    async fn launch(&self, node: &RingEntry, recovery: &RecoveryEndpoint)
        -> Result<(), LaunchError>;
}

/// Runs `command <address> <port> <recovery_host> <recovery_port>` for
/// every launch. The command is typically a script that starts
/// `ringkv-node` on the target host.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: String,
}

impl ProcessLauncher {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn build(&self, node: &RingEntry, recovery: &RecoveryEndpoint) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg(&node.address)
            .arg(node.port.to_string())
            .arg(&recovery.host)
            .arg(recovery.port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(false);
        cmd
    }
}

#[async_trait]
impl NodeLauncher for ProcessLauncher {
    async fn launch(
        &self,
        node: &RingEntry,
        recovery: &RecoveryEndpoint,
    ) -> Result<(), LaunchError> {
        let child = self
            .build(node, recovery)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                node: node.to_string(),
                source,
            })?;
        // Dropping the handle detaches the process; tokio reaps it on exit.
        tracing::info!(
            "launched {} via {} (pid {:?})",
            node,
            self.command,
            child.id()
        );
        Ok(())
    }
}
