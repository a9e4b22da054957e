//! Error types for Clouseau.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Decoding layer at which an inbound frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    /// The outer `{channel, payload}` frame.
    Frame,
    /// The `{type, payload}` session envelope.
    Envelope,
    /// The inner `{command, cwd}` document.
    Command,
    /// The payload of the identity channel.
    Identity,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameStage::Frame => "frame",
            FrameStage::Envelope => "envelope",
            FrameStage::Command => "command",
            FrameStage::Identity => "identity",
        })
    }
}

#[derive(Error, Debug)]
pub enum ClouseauError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout waiting for response on {response_channel} (request sent on {channel}, deadline {deadline:?})")]
    Timeout {
        channel: String,
        response_channel: String,
        deadline: Duration,
    },

    #[error("Request on {channel} cancelled while waiting for {response_channel}")]
    Cancelled {
        channel: String,
        response_channel: String,
    },

    #[error("Malformed {stage}: {reason}")]
    MalformedFrame { stage: FrameStage, reason: String },

    #[error("Connection closed")]
    Closed,

    #[error("File access error: {0}")]
    FileAccess(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ClouseauError {
    pub fn malformed(stage: FrameStage, reason: impl fmt::Display) -> Self {
        ClouseauError::MalformedFrame {
            stage,
            reason: reason.to_string(),
        }
    }

    /// True for errors a caller may reasonably retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClouseauError::Timeout { .. } | ClouseauError::Cancelled { .. }
        )
    }
}
