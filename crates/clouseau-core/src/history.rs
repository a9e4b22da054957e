//! Command history log for a terminal session.

use crate::Result;
use clouseau_types::{HistoryItem, NewHistoryItem};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Commands that are never recorded.
pub const IGNORED_COMMANDS: [&str; 4] = ["ls", "ll", "pwd", "clear"];

const PYTHON_FLAG_TYPE: &str = "python";
const PYTHON_FLAG_MESSAGE: &str = "Are you executing a model?";

#[derive(Debug, Default)]
struct HistoryState {
    items: Vec<HistoryItem>,
    /// Text of the command to mark as the run command when it next appears.
    expected_run_command: Option<String>,
}

impl HistoryState {
    fn clear_run_command_flags(&mut self) {
        for item in &mut self.items {
            item.run_command = false;
        }
    }
}

/// Ordered command history with at most one primary (run command) entry.
#[derive(Debug, Default)]
pub struct CommandHistory {
    state: RwLock<HistoryState>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from previously saved items.
    ///
    /// If several items are flagged as the run command, the last one keeps it.
    pub fn restore(items: Vec<HistoryItem>) -> Self {
        let history = Self::new();
        history.replace_items(items);
        history
    }

    fn read(&self) -> RwLockReadGuard<'_, HistoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HistoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a command to the history.
    ///
    /// Ignored commands are dropped and `None` is returned. A command matching
    /// the expected run command becomes the primary entry and consumes the
    /// expectation. Every append clears the run command flag on all existing
    /// items, including appends that do not set a new primary.
    pub fn add_history_item(&self, new: NewHistoryItem) -> Option<HistoryItem> {
        if is_ignored(&new.text) {
            debug!(target: "clouseau::history", "Ignoring history command {:?}", new.text);
            return None;
        }

        let mut state = self.write();
        let run_command = state.expected_run_command.as_deref() == Some(new.text.as_str());
        if run_command {
            state.expected_run_command = None;
        }
        state.clear_run_command_flags();

        let mut item = HistoryItem {
            id: Uuid::new_v4(),
            text: new.text,
            cwd: new.cwd,
            run_command,
            flag: false,
            flag_type: None,
            message: None,
        };
        if item.text.to_lowercase().contains(PYTHON_FLAG_TYPE) {
            item.flag = true;
            item.flag_type = Some(PYTHON_FLAG_TYPE.to_string());
            item.message = Some(PYTHON_FLAG_MESSAGE.to_string());
        }

        if run_command {
            info!(target: "clouseau::history", "Run command matched: {}", item.text);
        } else {
            debug!(target: "clouseau::history", "Appended history item: {}", item.text);
        }
        state.items.push(item.clone());
        Some(item)
    }

    /// Set or clear the primary flag directly.
    ///
    /// Every other item loses its flag. With `enable == false` no item keeps
    /// one. Returns true if `id` is in the history.
    pub fn mark_run_command(&self, id: Uuid, enable: bool) -> bool {
        let mut state = self.write();
        let mut found = false;
        for item in &mut state.items {
            let is_target = item.id == id;
            found |= is_target;
            item.run_command = enable && is_target;
        }
        debug!(target: "clouseau::history", "Marked run command {} -> {} (found: {})", id, enable, found);
        found
    }

    /// Delete an item by id.
    pub fn remove_history_item(&self, id: Uuid) -> Option<HistoryItem> {
        let mut state = self.write();
        let index = state.items.iter().position(|item| item.id == id)?;
        Some(state.items.remove(index))
    }

    /// Watch for `text` on the next matching append. An empty string clears
    /// the expectation.
    pub fn set_run_command(&self, text: impl Into<String>) {
        let text = text.into();
        debug!(target: "clouseau::history", "Expecting run command {:?}", text);
        self.write().expected_run_command = (!text.is_empty()).then_some(text);
    }

    pub fn expected_run_command(&self) -> Option<String> {
        self.read().expected_run_command.clone()
    }

    /// Remove every item. The expected run command is kept.
    pub fn clear_history_context(&self) {
        self.write().items.clear();
    }

    /// Replace the collection, keeping at most one primary entry.
    pub fn replace_items(&self, mut items: Vec<HistoryItem>) {
        if let Some(last) = items.iter().rposition(|item| item.run_command) {
            for (index, item) in items.iter_mut().enumerate() {
                item.run_command = index == last;
            }
        }
        self.write().items = items;
    }

    /// Snapshot of the items in insertion order.
    pub fn items(&self) -> Vec<HistoryItem> {
        self.read().items.clone()
    }

    /// The current primary entry, if any.
    pub fn run_command_item(&self) -> Option<HistoryItem> {
        self.read().items.iter().find(|item| item.run_command).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().items.is_empty()
    }
}

/// True if `text` is one of [`IGNORED_COMMANDS`].
pub fn is_ignored(text: &str) -> bool {
    IGNORED_COMMANDS.contains(&text)
}

/// JSON file holding the history items in browser storage format.
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    path: PathBuf,
}

impl HistorySnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved items. A missing file yields an empty history.
    pub fn load(&self) -> Result<Vec<HistoryItem>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, items: &[HistoryItem]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(items)?;
        std::fs::write(&self.path, json)?;
        debug!(target: "clouseau::history", "Saved {} history items to {}", items.len(), self.path.display());
        Ok(())
    }
}
