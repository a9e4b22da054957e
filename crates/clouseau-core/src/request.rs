//! Request/response correlation over one-way channels.
//!
//! A request is a frame on one channel; its response is the next frame on a
//! response channel. The response subscription is one-shot and is always
//! removed exactly once, whichever of response, deadline or cancellation wins.

use crate::{ChannelDispatcher, ClouseauError, Handler, Result, SessionTransport};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-call options for [`SessionTransport::await_emit_with`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// How long to wait for the response.
    pub timeout: Duration,
    /// Abandons the local wait when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::with_timeout(crate::DEFAULT_REQUEST_TIMEOUT)
    }
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: None,
        }
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// One-shot subscription on a response channel.
///
/// The handler is unregistered when this guard drops, so it is removed once
/// even if the waiting future itself is dropped.
struct ResponseSubscription {
    dispatcher: ChannelDispatcher,
    channel: String,
    handler: Handler,
}

impl ResponseSubscription {
    fn open(dispatcher: &ChannelDispatcher, channel: &str) -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let handler = Handler::new(move |payload: &Value| {
            let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(sender) = sender {
                let _ = sender.send(payload.clone());
            }
        });
        dispatcher.register(channel, handler.clone());

        let subscription = Self {
            dispatcher: dispatcher.clone(),
            channel: channel.to_string(),
            handler,
        };
        (subscription, rx)
    }
}

impl Drop for ResponseSubscription {
    fn drop(&mut self) {
        self.dispatcher.unregister(&self.channel, &self.handler);
    }
}

impl SessionTransport {
    /// Send `payload` on `channel` and wait for the next frame on
    /// `response_channel`, bounded by the transport's default deadline.
    pub async fn await_emit(
        &self,
        channel: &str,
        payload: impl Into<Value>,
        response_channel: &str,
    ) -> Result<Value> {
        let options = RequestOptions::with_timeout(self.options().request_timeout);
        self.await_emit_with(channel, payload, response_channel, options)
            .await
    }

    /// [`await_emit`](Self::await_emit) with an explicit deadline and an
    /// optional cancellation token.
    ///
    /// Only the local wait is abandoned on timeout or cancellation; nothing is
    /// sent to the remote side.
    pub async fn await_emit_with(
        &self,
        channel: &str,
        payload: impl Into<Value>,
        response_channel: &str,
        options: RequestOptions,
    ) -> Result<Value> {
        let payload = payload.into();
        let (subscription, response) = ResponseSubscription::open(self.dispatcher(), response_channel);
        let cancel = options.cancel.unwrap_or_default();

        let exchange = async {
            self.emit(channel, payload).await;
            response.await
        };

        let outcome = tokio::select! {
            resp = exchange => resp.map_err(|_| ClouseauError::Closed),
            _ = tokio::time::sleep(options.timeout) => Err(ClouseauError::Timeout {
                channel: channel.to_string(),
                response_channel: response_channel.to_string(),
                deadline: options.timeout,
            }),
            _ = cancel.cancelled() => Err(ClouseauError::Cancelled {
                channel: channel.to_string(),
                response_channel: response_channel.to_string(),
            }),
        };
        drop(subscription);

        match &outcome {
            Ok(resp) => info!(
                target: "clouseau::request",
                "Resolved response in: {}, out: {}, resp: {}", channel, response_channel, resp
            ),
            Err(e) => debug!(target: "clouseau::request", "Request on {} failed: {}", channel, e),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportOptions;
    use clouseau_types::Frame;
    use serde_json::json;
    use std::sync::Arc;

    fn open_transport() -> (Arc<SessionTransport>, crate::TransportLink) {
        let (transport, link) = SessionTransport::detached(TransportOptions::default());
        link.open();
        (Arc::new(transport), link)
    }

    #[tokio::test]
    async fn test_await_emit_resolves_with_response() {
        let (transport, mut link) = open_transport();

        let request = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.await_emit("req", json!({}), "resp").await })
        };

        let sent = link.next_outgoing().await.unwrap();
        assert_eq!(sent, Frame::new("req", json!({})));
        assert_eq!(transport.dispatcher().handler_count("resp"), 1);

        link.deliver(r#"{"channel":"resp","payload":{"ok":true}}"#).unwrap();

        let resp = request.await.unwrap().unwrap();
        assert_eq!(resp, json!({"ok": true}));
        assert!(!transport.dispatcher().has_channel("resp"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_emit_times_out_and_cleans_up() {
        let (transport, _link) = open_transport();

        let err = transport.await_emit("req", json!({}), "resp").await.unwrap_err();
        match err {
            ClouseauError::Timeout { channel, response_channel, deadline } => {
                assert_eq!(channel, "req");
                assert_eq!(response_channel, "resp");
                assert_eq!(deadline, Duration::from_millis(3000));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(!transport.dispatcher().has_channel("resp"));
        // A late response has nobody to talk to.
        assert_eq!(transport.dispatcher().dispatch("resp", &json!({"ok": true})), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_covers_connecting_wait() {
        let (transport, mut link) = SessionTransport::detached(TransportOptions::default());

        let err = transport
            .await_emit_with("ping", "test", "pong", RequestOptions::with_timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClouseauError::Timeout { .. }));

        // The frame never left because the socket never opened.
        drop(transport);
        assert!(link.next_outgoing().await.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_abandons_wait() {
        let (transport, _link) = open_transport();
        let token = CancellationToken::new();
        token.cancel();

        let err = transport
            .await_emit_with("req", Value::Null, "resp", RequestOptions::default().cancel_on(token))
            .await
            .unwrap_err();
        assert!(matches!(err, ClouseauError::Cancelled { .. }));
        assert!(!transport.dispatcher().has_channel("resp"));
    }

    #[tokio::test]
    async fn test_dropped_request_future_unregisters_handler() {
        let (transport, _link) = open_transport();
        {
            let fut = transport.await_emit("req", Value::Null, "resp");
            tokio::pin!(fut);
            let poll = futures::poll!(fut.as_mut());
            assert!(poll.is_pending());
            assert_eq!(transport.dispatcher().handler_count("resp"), 1);
        }
        assert!(!transport.dispatcher().has_channel("resp"));
    }

    #[tokio::test]
    async fn test_other_handlers_on_response_channel_survive() {
        let (transport, link) = open_transport();
        let keep = Handler::new(|_| {});
        transport.register("pong", keep.clone());

        let request = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.await_emit("ping", "test", "pong").await })
        };
        while transport.dispatcher().handler_count("pong") < 2 {
            tokio::task::yield_now().await;
        }
        link.deliver(r#"{"channel":"pong","payload":"test"}"#).unwrap();

        assert_eq!(request.await.unwrap().unwrap(), json!("test"));
        assert_eq!(transport.dispatcher().handler_count("pong"), 1);
        assert!(transport.unregister("pong", &keep));
    }

    #[tokio::test]
    async fn test_only_first_response_is_taken() {
        let (transport, link) = open_transport();
        let dispatcher = transport.dispatcher().clone();
        let (subscription, rx) = ResponseSubscription::open(&dispatcher, "resp");

        link.deliver(r#"{"channel":"resp","payload":1}"#).unwrap();
        link.deliver(r#"{"channel":"resp","payload":2}"#).unwrap();

        assert_eq!(rx.await.unwrap(), json!(1));
        drop(subscription);
        assert!(!dispatcher.has_channel("resp"));
    }
}
