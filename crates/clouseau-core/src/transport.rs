//! Session transport: one WebSocket connection multiplexed into channels.
//!
//! A [`SessionTransport`] owns the channel dispatcher, the client identity and
//! the connection state for a single session. The socket itself is driven by
//! a background task through a [`TransportLink`]; callers that bring their
//! own socket can create a detached transport and drive the link themselves.

use crate::{ChannelDispatcher, ClientIdentity, ClouseauError, FrameStage, Handler, Registration, Result};
use clouseau_types::{ConnectionState, Frame};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Default deadline for a correlated request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

/// Lifecycle events of the physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Open,
    Error(String),
    Closed,
}

/// Options for a session transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Deadline used by `await_emit` when no per-call deadline is given.
    pub request_timeout: Duration,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_capacity: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_capacity: 64,
        }
    }
}

/// State shared between a transport handle and its link.
struct Shared {
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    dispatcher: ChannelDispatcher,
    identity: ClientIdentity,
    last_error: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn open(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Open;
                true
            } else {
                false
            }
        });
        if changed {
            info!(target: "clouseau::transport", "WebSocket opened");
            let _ = self.events.send(ConnectionEvent::Open);
        }
    }

    fn fail(&self, reason: String) {
        warn!(target: "clouseau::transport", "WebSocket error: {}", reason);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.clone());
        let _ = self.events.send(ConnectionEvent::Error(reason));
    }

    fn close(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });
        if changed {
            info!(target: "clouseau::transport", "WebSocket closed");
            let _ = self.events.send(ConnectionEvent::Closed);
        }
    }

    /// Ingress point for every raw inbound message.
    fn deliver(&self, raw: &str) -> Result<()> {
        trace!(target: "clouseau::transport", "<- {}", raw);
        let frame: Frame =
            serde_json::from_str(raw).map_err(|e| ClouseauError::malformed(FrameStage::Frame, e))?;
        self.route(frame)
    }

    fn route(&self, frame: Frame) -> Result<()> {
        if *self.state.borrow() == ConnectionState::Closed {
            trace!(target: "clouseau::transport", "Dropping frame on {} after close", frame.channel);
            return Ok(());
        }
        if frame.is_fatal() {
            error!(target: "clouseau::transport", "Server error {}", frame.payload);
        }
        if frame.is_identity() {
            return self.identity.assign_from(&frame.payload);
        }
        self.dispatcher.dispatch(&frame.channel, &frame.payload);
        Ok(())
    }
}

/// Handle to one multiplexed session connection.
///
/// Dropping the transport closes the socket.
pub struct SessionTransport {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Frame>,
    options: TransportOptions,
    driver: Option<JoinHandle<()>>,
}

impl SessionTransport {
    /// Start connecting to `url` and return immediately in the CONNECTING state.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(url: impl Into<String>, options: TransportOptions) -> Self {
        let (mut transport, link) = Self::detached(options);
        let url = url.into();
        transport.driver = Some(tokio::spawn(drive(url, link)));
        transport
    }

    /// Create a transport with no socket attached. The returned link is the
    /// socket side: it moves the state machine and feeds inbound frames.
    pub fn detached(options: TransportOptions) -> (Self, TransportLink) {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            state,
            events,
            dispatcher: ChannelDispatcher::new(),
            identity: ClientIdentity::new(),
            last_error: Mutex::new(None),
            shutdown: CancellationToken::new(),
        });

        let transport = Self {
            shared: shared.clone(),
            outgoing: outgoing_tx,
            options,
            driver: None,
        };
        let link = TransportLink {
            shared,
            outgoing: outgoing_rx,
        };
        (transport, link)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Subscribe to open/error/close events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn dispatcher(&self) -> &ChannelDispatcher {
        &self.shared.dispatcher
    }

    pub fn register(&self, channel: &str, handler: Handler) -> Registration {
        self.shared.dispatcher.register(channel, handler)
    }

    pub fn unregister(&self, channel: &str, handler: &Handler) -> bool {
        self.shared.dispatcher.unregister(channel, handler)
    }

    /// The server-assigned client id, once received.
    pub fn client_id(&self) -> Option<String> {
        self.shared.identity.get()
    }

    /// Wait for the server to assign a client id.
    ///
    /// Fails with the close reason if the connection closes before an id
    /// arrives.
    pub async fn wait_for_client_id(&self) -> Result<String> {
        tokio::select! {
            biased;
            id = self.shared.identity.wait() => id,
            _ = self.closed() => self.client_id().ok_or_else(|| self.close_reason()),
        }
    }

    async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Wait until the connection leaves CONNECTING.
    ///
    /// Returns the last socket error (or `Closed`) if the connection never opened.
    pub async fn wait_open(&self) -> Result<()> {
        match self.settled_state().await {
            ConnectionState::Open => Ok(()),
            _ => Err(self.close_reason()),
        }
    }

    async fn settled_state(&self) -> ConnectionState {
        let mut rx = self.shared.state.subscribe();
        match rx.wait_for(|s| *s != ConnectionState::Connecting).await {
            Ok(state) => *state,
            Err(_) => ConnectionState::Closed,
        }
    }

    fn close_reason(&self) -> ClouseauError {
        match self
            .shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(reason) => ClouseauError::Transport(reason),
            None => ClouseauError::Closed,
        }
    }

    /// Send a frame once the connection is open.
    ///
    /// Failures are not reported to the caller; they surface through the
    /// lifecycle events and the log.
    pub async fn emit(&self, channel: &str, payload: impl Into<Value>) {
        if let Err(e) = self.try_emit(channel, payload).await {
            debug!(target: "clouseau::transport", "Dropped frame on {}: {}", channel, e);
        }
    }

    /// Like [`emit`](Self::emit) but reports why a frame could not be queued.
    pub async fn try_emit(&self, channel: &str, payload: impl Into<Value>) -> Result<()> {
        let frame = Frame::new(channel, payload);
        if self.settled_state().await != ConnectionState::Open {
            return Err(ClouseauError::Closed);
        }
        trace!(target: "clouseau::transport", "-> {}", frame.channel);
        self.outgoing.send(frame).map_err(|_| ClouseauError::Closed)
    }

    /// Close the socket and wait for the socket task to send its close frame.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!(target: "clouseau::transport", "Socket task ended abnormally: {}", e);
            }
        }
    }

    /// Close the socket. Idempotent; a closed transport never reopens.
    pub fn close(&self) {
        debug!(target: "clouseau::transport", "WebSocket close called");
        self.shared.shutdown.cancel();
        self.shared.close();
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Socket side of a [`SessionTransport`].
pub struct TransportLink {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedReceiver<Frame>,
}

impl TransportLink {
    /// Report that the socket opened.
    pub fn open(&self) {
        self.shared.open();
    }

    /// Report a socket error.
    pub fn fail(&self, reason: impl Display) {
        self.shared.fail(reason.to_string());
    }

    /// Report that the socket closed.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Feed one raw inbound message (a JSON frame) into the dispatcher.
    pub fn deliver(&self, raw: &str) -> Result<()> {
        self.shared.deliver(raw)
    }

    /// Feed an already decoded frame.
    pub fn deliver_frame(&self, frame: Frame) -> Result<()> {
        self.shared.route(frame)
    }

    /// Next frame the client wants to send. `None` once the transport is dropped.
    pub async fn next_outgoing(&mut self) -> Option<Frame> {
        self.outgoing.recv().await
    }

    /// Resolves when the transport asked for the socket to close.
    pub async fn closed_by_client(&self) {
        self.shared.shutdown.cancelled().await
    }
}

/// Connect to `url` and pump frames until either side closes.
async fn drive(url: String, mut link: TransportLink) {
    info!(target: "clouseau::transport", "WebSocket connecting to {}", url);
    let shutdown = link.shared.shutdown.clone();

    let stream = tokio::select! {
        _ = shutdown.cancelled() => {
            link.close();
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                link.fail(&e);
                link.close();
                return;
            }
        }
    };

    link.open();
    run_socket(stream, &mut link).await;
    link.close();
}

/// Pump frames between a WebSocket stream and a transport link.
///
/// Generic over the stream so the same loop runs over TLS, plain TCP or an
/// in-memory duplex.
pub async fn run_socket<S>(stream: S, link: &mut TransportLink)
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let (mut ws_tx, mut ws_rx) = stream.split();
    let shared = link.shared.clone();
    let outgoing = &mut link.outgoing;

    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            frame = outgoing.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(target: "clouseau::transport", "Failed to encode frame on {}: {}", frame.channel, e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                    shared.fail(e.to_string());
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = shared.deliver(&text) {
                            warn!(target: "clouseau::transport", "Skipping inbound message: {}", e);
                        }
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => {
                            if let Err(e) = shared.deliver(text) {
                                warn!(target: "clouseau::transport", "Skipping inbound message: {}", e);
                            }
                        }
                        Err(_) => {
                            warn!(target: "clouseau::transport", "Skipping non UTF-8 binary message ({} bytes)", data.len());
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        shared.fail(e.to_string());
                        break;
                    }
                }
            }
        }
    }
}
