//! Attach to a terminal session and keep its command history.

use crate::collaborators::{PromptPolicy, StdoutEditor};
use crate::config::Config;
use crate::files::HttpFileAccess;
use anyhow::{Context, Result};
use clouseau_core::{
    CommandHistory, ConnectionEvent, HistorySnapshot, SessionChannels, SessionClassifier, SessionCollaborators,
    SessionTransport, TransportOptions,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Options that come from the command line rather than the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Accept every confirmation prompt.
    pub accept_prompts: bool,
}

/// State at the end of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub client_id: Option<String>,
    pub history: Arc<CommandHistory>,
}

/// Run until ctrl-c or until the server closes the connection.
pub async fn run(config: Config, options: RunOptions) -> Result<RunSummary> {
    run_until(config, options, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(target: "clouseau::startup", "Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Run until `shutdown` resolves or the server closes the connection. The
/// history is written to the snapshot file on the way out.
pub async fn run_until(config: Config, options: RunOptions, shutdown: impl Future<Output = ()>) -> Result<RunSummary> {
    let snapshot = HistorySnapshot::new(&config.history_file);
    let items = snapshot
        .load()
        .with_context(|| format!("Failed to load history from {}", snapshot.path().display()))?;
    info!(target: "clouseau::startup", "Loaded {} history items from {}", items.len(), snapshot.path().display());
    let history = Arc::new(CommandHistory::restore(items));

    let transport = SessionTransport::connect(
        config.url.clone(),
        TransportOptions {
            request_timeout: config.request_timeout(),
            ..TransportOptions::default()
        },
    );
    let mut events = transport.subscribe();

    let collaborators = SessionCollaborators {
        prompts: Arc::new(PromptPolicy::new(history.clone(), options.accept_prompts)),
        files: Arc::new(HttpFileAccess::new(config.api_base.clone())),
        editor: Arc::new(StdoutEditor),
    };
    let classifier = Arc::new(SessionClassifier::new(history.clone(), collaborators));
    let attachment = classifier.attach(transport.dispatcher(), &SessionChannels::with_prefix(&config.session_channel));

    transport
        .wait_open()
        .await
        .with_context(|| format!("Failed to connect to {}", config.url))?;

    if config.ping_on_connect {
        match transport.await_emit("ping", "test", "pong").await {
            Ok(_) => info!(target: "clouseau::startup", "Session server is responding"),
            Err(e) => warn!(target: "clouseau::startup", "Health check failed: {}", e),
        }
    }

    tokio::select! {
        _ = shutdown => info!(target: "clouseau::startup", "Shutting down"),
        _ = wait_closed(&mut events) => info!(target: "clouseau::startup", "Server closed the session"),
    }

    attachment.detach();
    let client_id = transport.client_id();
    transport.shutdown().await;

    snapshot
        .save(&history.items())
        .with_context(|| format!("Failed to save history to {}", snapshot.path().display()))?;
    info!(target: "clouseau::startup", "Saved {} history items", history.len());

    Ok(RunSummary { client_id, history })
}

async fn wait_closed(events: &mut broadcast::Receiver<ConnectionEvent>) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Closed) | Err(broadcast::error::RecvError::Closed) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        }
    }
}
