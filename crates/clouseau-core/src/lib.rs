//! Client-side messaging core for Clouseau terminal sessions.

mod dispatcher;
mod error;
mod history;
mod identity;
mod request;
mod session;
mod transport;

pub use dispatcher::{ChannelDispatcher, Handler, Registration};
pub use error::{ClouseauError, FrameStage};
pub use history::{is_ignored, CommandHistory, HistorySnapshot, IGNORED_COMMANDS};
pub use identity::ClientIdentity;
pub use request::RequestOptions;
pub use session::{
    decode_command, decode_envelope, open_for_edit, resolve_edit_path, Classification, EditorContents,
    EditorOpener, FileAccess, PromptConfirmer, SessionAttachment, SessionChannels, SessionClassifier,
    SessionCollaborators,
};
pub use transport::{
    run_socket, ConnectionEvent, SessionTransport, TransportLink, TransportOptions, DEFAULT_REQUEST_TIMEOUT,
};

/// Result type for Clouseau operations.
pub type Result<T> = std::result::Result<T, ClouseauError>;
