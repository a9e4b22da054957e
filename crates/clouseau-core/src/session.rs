//! Terminal session event classifier.
//!
//! Session frames are decoded in two layers, the `{type, payload}` envelope and
//! the inner `{command, cwd}` document, and routed by kind:
//!
//! - `message` appends the command to the [`CommandHistory`]
//! - `prompt` hands the command to a [`PromptConfirmer`]
//! - `blocked` opens `edit <path>` targets through [`FileAccess`] and [`EditorOpener`]
//!
//! Unknown envelope types are skipped.

use crate::{ChannelDispatcher, ClouseauError, CommandHistory, FrameStage, Handler, Registration, Result};
use clouseau_types::{HistoryItem, SessionCommand, SessionEnvelope, SessionEvent, SessionEventKind};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const EDIT_VERB: &str = "edit ";

/// Receives commands that need confirmation before they run.
pub trait PromptConfirmer: Send + Sync {
    fn confirm(&self, command: SessionCommand);
}

/// Reads file contents on behalf of the blocked `edit` verb.
pub trait FileAccess: Send + Sync {
    fn read_file(&self, path: String) -> BoxFuture<'static, Result<String>>;
}

/// A file ready to be shown in an editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorContents {
    pub path: String,
    pub text: String,
}

/// Opens an editor on fetched file contents.
pub trait EditorOpener: Send + Sync {
    fn open_editor(&self, contents: EditorContents);
}

/// External collaborators the classifier reports to.
#[derive(Clone)]
pub struct SessionCollaborators {
    pub prompts: Arc<dyn PromptConfirmer>,
    pub files: Arc<dyn FileAccess>,
    pub editor: Arc<dyn EditorOpener>,
}

/// Channel names a session is delivered on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChannels {
    /// Carries full `{type, payload}` envelopes.
    pub envelope: String,
    pub message: String,
    pub prompt: String,
    pub blocked: String,
}

impl Default for SessionChannels {
    fn default() -> Self {
        Self::with_prefix("term")
    }
}

impl SessionChannels {
    /// `prefix` for envelopes, `prefix/<kind>` for the per-kind channels.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            envelope: prefix.to_string(),
            message: format!("{}/message", prefix),
            prompt: format!("{}/prompt", prefix),
            blocked: format!("{}/blocked", prefix),
        }
    }

    pub fn kind_channel(&self, kind: SessionEventKind) -> &str {
        match kind {
            SessionEventKind::Message => &self.message,
            SessionEventKind::Prompt => &self.prompt,
            SessionEventKind::Blocked => &self.blocked,
        }
    }
}

/// What the classifier did with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// A `message` event. `None` when the command is on the ignore list.
    Appended(Option<HistoryItem>),
    /// A `prompt` event handed to the confirmer.
    Prompted,
    /// A blocked `edit` whose target is being fetched.
    EditRequested { path: String },
    /// A blocked command that is not an `edit`.
    NotAnEdit,
}

/// Parse one protocol layer. The layer arrives either as a JSON string or as
/// an already decoded value.
fn parse_layer<T: DeserializeOwned>(value: &Value, stage: FrameStage) -> Result<T> {
    let parsed = match value {
        Value::String(raw) => serde_json::from_str(raw),
        other => serde_json::from_value(other.clone()),
    };
    parsed.map_err(|e| ClouseauError::malformed(stage, e))
}

/// Decode an envelope frame payload. Unknown `type` values yield `Ok(None)`.
pub fn decode_envelope(payload: &Value) -> Result<Option<SessionEvent>> {
    let envelope: SessionEnvelope = parse_layer(payload, FrameStage::Envelope)?;
    let Some(kind) = SessionEventKind::from_type(&envelope.kind) else {
        debug!(target: "clouseau::session", "Skipping session event of type {:?}", envelope.kind);
        return Ok(None);
    };
    decode_command(kind, &envelope.payload).map(Some)
}

/// Decode the inner `{command, cwd}` document for a known kind.
pub fn decode_command(kind: SessionEventKind, payload: &Value) -> Result<SessionEvent> {
    let command = parse_layer(payload, FrameStage::Command)?;
    Ok(SessionEvent { kind, command })
}

/// Target path of a blocked `edit <path>` command.
///
/// Absolute paths are returned unchanged. Relative paths are appended to
/// `cwd` as `cwd/path` without resolving `.` or `..`.
pub fn resolve_edit_path(command: &SessionCommand) -> Option<String> {
    let path = command.command.trim().strip_prefix(EDIT_VERB)?;
    if path.starts_with('/') {
        Some(path.to_string())
    } else {
        Some(format!("{}/{}", command.cwd, path))
    }
}

/// Routes decoded session events to the history log and collaborators.
pub struct SessionClassifier {
    history: Arc<CommandHistory>,
    collaborators: SessionCollaborators,
}

impl SessionClassifier {
    pub fn new(history: Arc<CommandHistory>, collaborators: SessionCollaborators) -> Self {
        Self {
            history,
            collaborators,
        }
    }

    pub fn history(&self) -> &Arc<CommandHistory> {
        &self.history
    }

    /// Register on the envelope channel and the three per-kind channels.
    pub fn attach(self: &Arc<Self>, dispatcher: &ChannelDispatcher, channels: &SessionChannels) -> SessionAttachment {
        let mut registrations = Vec::with_capacity(4);

        let classifier = Arc::clone(self);
        let envelope = Handler::new(move |payload| {
            if let Err(e) = classifier.classify_envelope(payload) {
                warn!(target: "clouseau::session", "Dropping session frame: {}", e);
            }
        });
        registrations.push(dispatcher.register(&channels.envelope, envelope));

        for kind in SessionEventKind::ALL {
            let classifier = Arc::clone(self);
            let handler = Handler::new(move |payload| {
                match decode_command(kind, payload) {
                    Ok(event) => {
                        classifier.handle(event);
                    }
                    Err(e) => warn!(target: "clouseau::session", "Dropping {} frame: {}", kind.as_str(), e),
                }
            });
            registrations.push(dispatcher.register(channels.kind_channel(kind), handler));
        }

        info!(target: "clouseau::session", "Session classifier attached to {}", channels.envelope);
        SessionAttachment { registrations }
    }

    /// Decode and handle an envelope frame payload.
    ///
    /// Returns `Ok(None)` for unknown event types.
    pub fn classify_envelope(&self, payload: &Value) -> Result<Option<Classification>> {
        Ok(decode_envelope(payload)?.map(|event| self.handle(event)))
    }

    pub fn handle(&self, event: SessionEvent) -> Classification {
        let SessionEvent { kind, command } = event;
        debug!(target: "clouseau::session", "{} event: {} (cwd {})", kind.as_str(), command.command, command.cwd);

        match kind {
            SessionEventKind::Message => Classification::Appended(self.history.add_history_item(command.into())),
            SessionEventKind::Prompt => {
                self.collaborators.prompts.confirm(command);
                Classification::Prompted
            }
            SessionEventKind::Blocked => match resolve_edit_path(&command) {
                Some(path) => {
                    self.spawn_edit(path.clone());
                    Classification::EditRequested { path }
                }
                None => {
                    debug!(target: "clouseau::session", "Blocked command is not an edit: {}", command.command);
                    Classification::NotAnEdit
                }
            },
        }
    }

    fn spawn_edit(&self, path: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(target: "clouseau::session", "No runtime to fetch {}", path);
            return;
        };
        let files = Arc::clone(&self.collaborators.files);
        let editor = Arc::clone(&self.collaborators.editor);
        runtime.spawn(async move {
            if let Err(e) = open_for_edit(files.as_ref(), editor.as_ref(), path.clone()).await {
                warn!(target: "clouseau::session", "Could not open {} for editing: {}", path, e);
            }
        });
    }
}

/// Fetch `path` and hand its contents to the editor. The editor is not opened
/// when the fetch fails.
pub async fn open_for_edit(files: &dyn FileAccess, editor: &dyn EditorOpener, path: String) -> Result<()> {
    let text = files.read_file(path.clone()).await?;
    info!(target: "clouseau::session", "Opening {} in editor", path);
    editor.open_editor(EditorContents { path, text });
    Ok(())
}

/// Dispatcher registrations made by [`SessionClassifier::attach`].
#[derive(Debug)]
pub struct SessionAttachment {
    registrations: Vec<Registration>,
}

impl SessionAttachment {
    /// Remove every registration. Returns how many were still registered.
    pub fn detach(self) -> usize {
        self.registrations
            .into_iter()
            .map(Registration::unregister)
            .filter(|removed| *removed)
            .count()
    }
}
