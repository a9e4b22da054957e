//! Transport frame protocol between client and server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Channel on which the server pushes the connection's client id.
pub const IDENTITY_CHANNEL: &str = "id";

/// Channel on which the server reports unrecoverable errors.
pub const FATAL_CHANNEL: &str = "fatal";

/// The unit sent and received over the transport.
///
/// Wire format: `{"channel": "<name>", "payload": <any json>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Logical channel name (free-form).
    pub channel: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn new(channel: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// True if this frame carries the server-assigned identity.
    pub fn is_identity(&self) -> bool {
        self.channel == IDENTITY_CHANNEL
    }

    /// True if this frame is a server fatal error report.
    pub fn is_fatal(&self) -> bool {
        self.channel == FATAL_CHANNEL
    }
}

/// Coarse state of the physical connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Socket is being established; frames are held back.
    #[default]
    Connecting,
    /// Socket is open and frames flow.
    Open,
    /// Socket is closed. Terminal for the connection instance.
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
