use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::CoreError;

/// Events pushed to dashboard WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DashboardEvent {
    ScreenOutput(String),
    ServerStatus(StatusSnapshot),
    ServerControl(ControlNotice),
}

/// Messages browsers may send over the dashboard socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    RequestStatus,
}

pub const UNKNOWN: &str = "Unknown";

/// Snapshot of the game's `serverinfo` answer. Fields stay `"Unknown"` while
/// the remote console is offline or the answer could not be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub players: Value,
    pub max_players: Value,
    pub fps: Value,
    pub entities: Value,
    pub raw: String,
}

impl StatusSnapshot {
    pub fn offline() -> Self {
        Self::unknown("offline")
    }

    pub fn online() -> Self {
        Self::unknown("online")
    }

    fn unknown(status: &str) -> Self {
        Self {
            status: status.to_string(),
            players: Value::from(UNKNOWN),
            max_players: Value::from(UNKNOWN),
            fps: Value::from(UNKNOWN),
            entities: Value::from(UNKNOWN),
            raw: String::new(),
        }
    }

    /// Builds an online snapshot from the raw `serverinfo` response body.
    pub fn from_serverinfo(body: &str) -> Self {
        let mut snapshot = Self::online();
        let Ok(Value::Object(info)) = serde_json::from_str::<Value>(body) else {
            return snapshot;
        };
        let field = |key: &str| info.get(key).cloned().unwrap_or_else(|| Value::from(UNKNOWN));
        snapshot.players = field("Players");
        snapshot.max_players = field("MaxPlayers");
        snapshot.fps = field("Framerate");
        snapshot.entities = field("EntityCount");
        snapshot.raw = serde_json::to_string_pretty(&info).unwrap_or_default();
        snapshot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlPhase {
    Starting,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlNotice {
    pub status: ControlPhase,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlStatus {
    pub running: bool,
    pub state: String,
    pub startup_logs: Vec<String>,
    pub uptime: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub active: bool,
    pub has_config: bool,
    pub has_data: bool,
    pub has_lang: bool,
}

/// The four files a plugin may own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginFileKind {
    Code,
    Config,
    Data,
    Lang,
}

impl PluginFileKind {
    /// Content returned when the file does not exist yet.
    pub fn placeholder(&self) -> &'static str {
        match self {
            PluginFileKind::Code => "",
            _ => "{}",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PluginFileKind::Code => "cs",
            _ => "json",
        }
    }
}

impl FromStr for PluginFileKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "config" => Ok(Self::Config),
            "data" => Ok(Self::Data),
            "lang" => Ok(Self::Lang),
            other => Err(CoreError::invalid_value("type", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serverinfo_fields_are_lifted_into_the_snapshot() {
        let snapshot =
            StatusSnapshot::from_serverinfo(r#"{"Players": 3, "MaxPlayers": 8, "Framerate": 60}"#);

        assert_eq!(snapshot.status, "online");
        assert_eq!(snapshot.players, Value::from(3));
        assert_eq!(snapshot.max_players, Value::from(8));
        assert_eq!(snapshot.fps, Value::from(60));
        assert_eq!(snapshot.entities, Value::from(UNKNOWN));
        assert!(snapshot.raw.contains("\"Players\": 3"));
    }

    #[test]
    fn garbage_serverinfo_keeps_unknown_fields() {
        let snapshot = StatusSnapshot::from_serverinfo("not json");
        assert_eq!(snapshot.status, "online");
        assert_eq!(snapshot.players, Value::from(UNKNOWN));
        assert!(snapshot.raw.is_empty());
    }

    #[test]
    fn events_carry_their_wire_names() {
        let json = serde_json::to_value(DashboardEvent::ScreenOutput("hello".into()))
            .expect("serialize event");
        assert_eq!(json["event"], "screen_output");
        assert_eq!(json["data"], "hello");

        let msg: ClientMessage =
            serde_json::from_str(r#"{"event":"request_status"}"#).expect("parse client message");
        assert!(matches!(msg, ClientMessage::RequestStatus));
    }
}
