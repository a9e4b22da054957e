//! Command history items.

use crate::SessionCommand;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in the command history.
///
/// Serialized in camelCase so snapshots match the browser's `historyItems`
/// storage format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    /// Opaque id generated when the item is appended.
    pub id: Uuid,
    /// The command text.
    pub text: String,
    /// Working directory the command ran in.
    #[serde(default)]
    pub cwd: String,
    /// True for the single primary (directive) entry.
    #[serde(default, skip_serializing_if = "is_false")]
    pub run_command: bool,
    /// Set when the command looks like a model execution.
    #[serde(default, skip_serializing_if = "is_false")]
    pub flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_type: Option<String>,
    /// Human readable note attached to a flagged item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Input to `CommandHistory::add_history_item`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHistoryItem {
    pub text: String,
    #[serde(default)]
    pub cwd: String,
}

impl NewHistoryItem {
    pub fn new(text: impl Into<String>, cwd: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cwd: cwd.into(),
        }
    }
}

impl From<SessionCommand> for NewHistoryItem {
    fn from(cmd: SessionCommand) -> Self {
        Self {
            text: cmd.command,
            cwd: cmd.cwd,
        }
    }
}
