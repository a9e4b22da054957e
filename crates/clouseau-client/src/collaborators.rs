//! Terminal stand-ins for the prompt dialog and the file editor.

use clouseau_core::{CommandHistory, EditorContents, EditorOpener, PromptConfirmer};
use clouseau_types::SessionCommand;
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

/// Handles confirmation prompts.
///
/// An accepted prompt makes its command the expected run command, so the
/// next matching history entry becomes the primary one.
pub struct PromptPolicy {
    history: Arc<CommandHistory>,
    accept: bool,
}

impl PromptPolicy {
    pub fn new(history: Arc<CommandHistory>, accept: bool) -> Self {
        Self { history, accept }
    }
}

impl PromptConfirmer for PromptPolicy {
    fn confirm(&self, command: SessionCommand) {
        if self.accept {
            info!(target: "clouseau::session", "Accepted prompt, expecting run command: {}", command.command);
            self.history.set_run_command(command.command);
        } else {
            info!(
                target: "clouseau::session",
                "Prompt left unanswered: {} (cwd {})", command.command, command.cwd
            );
        }
    }
}

/// Writes fetched files to stdout.
#[derive(Debug, Default)]
pub struct StdoutEditor;

impl StdoutEditor {
    fn print(contents: &EditorContents) -> std::io::Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "==> {} <==", contents.path)?;
        out.write_all(contents.text.as_bytes())?;
        writeln!(out)?;
        out.flush()
    }
}

impl EditorOpener for StdoutEditor {
    fn open_editor(&self, contents: EditorContents) {
        if let Err(e) = Self::print(&contents) {
            warn!(target: "clouseau::session", "Failed to print {}: {}", contents.path, e);
        }
    }
}
