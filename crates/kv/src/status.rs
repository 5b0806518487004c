//! Node lifecycle state machine.

use std::fmt;

/// Lifecycle state of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Uninitialized,
    Stopped,
    Active,
    WriteLocked,
    Shutdown,
}

/// Orchestrator commands that may change [`NodeStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Init,
    Start,
    Stop,
    LockWrite,
    UnlockWrite,
    Update,
    MoveData,
    Shutdown,
}

impl NodeStatus {
    /// State after applying `cmd`, or `None` if the command is illegal here.
    pub fn apply(self, cmd: Command) -> Option<NodeStatus> {
        use NodeStatus::*;
        match (cmd, self) {
            (Command::Shutdown, _) => Some(Shutdown),
            (_, Shutdown) => None,
            (Command::Init, Uninitialized) => Some(Stopped),
            (Command::Start, Uninitialized | Stopped) => Some(Active),
            (Command::Stop, Active) => Some(Stopped),
            (Command::LockWrite, Active) => Some(WriteLocked),
            (Command::UnlockWrite, WriteLocked) => Some(Active),
            (Command::Update | Command::MoveData, s) if s != Uninitialized => Some(s),
            _ => None,
        }
    }

    /// Whether client key operations are served at all.
    pub fn serves_clients(self) -> bool {
        matches!(self, NodeStatus::Active | NodeStatus::WriteLocked)
    }

    pub fn accepts_writes(self) -> bool {
        self == NodeStatus::Active
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Uninitialized => "UNINITIALIZED",
            NodeStatus::Stopped => "STOPPED",
            NodeStatus::Active => "ACTIVE",
            NodeStatus::WriteLocked => "WRITELOCKED",
            NodeStatus::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
