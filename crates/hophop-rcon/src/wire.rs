use serde::{Deserialize, Serialize};

use hophop_core::proto::CommandId;

/// Frame sent to the game's WebRcon endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutboundFrame<'a> {
    pub identifier: CommandId,
    pub message: &'a str,
    pub name: &'a str,
}

impl<'a> OutboundFrame<'a> {
    pub fn new(identifier: CommandId, message: &'a str) -> Self {
        Self {
            identifier,
            message,
            name: "WebRcon",
        }
    }
}

/// Frame received from the game. Only `Identifier` and `Message` matter here;
/// everything else the server attaches is ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundFrame {
    #[serde(default)]
    pub identifier: Option<CommandId>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "Type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsoleEntry {
    #[serde(default)]
    message: String,
}

/// Flattens a `console.tail` answer (a JSON array of log entries) into the
/// newline-joined message text. Returns `None` when the body is not such an
/// array.
pub fn join_console_messages(body: &str) -> Option<String> {
    let entries: Vec<ConsoleEntry> = serde_json::from_str(body).ok()?;
    let lines: Vec<&str> = entries
        .iter()
        .map(|entry| entry.message.as_str())
        .filter(|message| !message.is_empty())
        .collect();
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_frame_uses_webrcon_field_names() {
        let json = serde_json::to_value(OutboundFrame::new(7, "status")).expect("serialize");
        assert_eq!(json["Identifier"], 7);
        assert_eq!(json["Message"], "status");
        assert_eq!(json["Name"], "WebRcon");
    }

    #[test]
    fn inbound_frame_tolerates_missing_fields() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"Message":"hi","Type":"Generic"}"#).expect("parse");
        assert_eq!(frame.identifier, None);
        assert_eq!(frame.message.as_deref(), Some("hi"));
        assert_eq!(frame.kind.as_deref(), Some("Generic"));
    }

    #[test]
    fn console_tail_is_flattened() {
        let body = r#"[{"Message":"one","Type":"Generic"},{"Message":""},{"Message":"two"}]"#;
        assert_eq!(join_console_messages(body).as_deref(), Some("one\ntwo"));
        assert_eq!(join_console_messages("nope"), None);
    }
}
