use serde::{Deserialize, Serialize};

pub type UnixMillis = u64;

/// RCON command identifier. The game server echoes it back verbatim and uses
/// negative values for unsolicited broadcasts.
pub type CommandId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub at_ms: UnixMillis,
    pub stream: LogStream,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Lifecycle of the supervised game-server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum ServerState {
    NotStarted {},

    Starting { since_ms: UnixMillis },

    Running { pid: u32, started_at_ms: UnixMillis },

    Stopping { pid: u32, since_ms: UnixMillis },

    Stopped { exit: ExitInfo, at_ms: UnixMillis },

    Crashed { exit: ExitInfo, at_ms: UnixMillis },
}

impl ServerState {
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ServerState::Starting { .. } | ServerState::Running { .. } | ServerState::Stopping { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServerState::NotStarted {} => "not_started",
            ServerState::Starting { .. } => "starting",
            ServerState::Running { .. } => "running",
            ServerState::Stopping { .. } => "stopping",
            ServerState::Stopped { .. } => "stopped",
            ServerState::Crashed { .. } => "crashed",
        }
    }
}
