//! Terminal session envelope protocol.
//!
//! Session frames carry a JSON envelope `{"type": ..., "payload": ...}` whose
//! payload is itself a JSON-encoded `{"command": ..., "cwd": ...}` string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of event reported by the remote terminal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    /// A command has already executed in the remote shell.
    Message,
    /// A command needs interactive confirmation before it runs.
    Prompt,
    /// A command was intercepted because it matches a locally handled verb.
    Blocked,
}

impl SessionEventKind {
    pub const ALL: [SessionEventKind; 3] = [
        SessionEventKind::Message,
        SessionEventKind::Prompt,
        SessionEventKind::Blocked,
    ];

    /// Parse an envelope `type` value. Unknown values yield `None`.
    pub fn from_type(s: &str) -> Option<Self> {
        match s {
            "message" => Some(SessionEventKind::Message),
            "prompt" => Some(SessionEventKind::Prompt),
            "blocked" => Some(SessionEventKind::Blocked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEventKind::Message => "message",
            SessionEventKind::Prompt => "prompt",
            SessionEventKind::Blocked => "blocked",
        }
    }
}

/// Outer session envelope as it appears on the wire.
///
/// `kind` is kept as a string so unknown types can be skipped instead of
/// failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl SessionEnvelope {
    /// Build an envelope whose payload is the JSON-encoded command.
    pub fn encode(kind: SessionEventKind, command: &SessionCommand) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            payload: Value::String(command.to_json()),
        }
    }
}

/// A shell command together with the directory it ran in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCommand {
    pub command: String,
    #[serde(default)]
    pub cwd: String,
}

impl SessionCommand {
    pub fn new(command: impl Into<String>, cwd: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
        }
    }

    /// JSON string form used inside session envelopes.
    pub fn to_json(&self) -> String {
        serde_json::json!({ "command": self.command, "cwd": self.cwd }).to_string()
    }
}

/// A decoded session event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub command: SessionCommand,
}
