//! Channel dispatcher: many-to-many publish/subscribe over named channels.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

type HandlerFn = dyn Fn(&Value) + Send + Sync;

/// A callback registered on a channel.
///
/// Handlers compare by reference: two clones of the same `Handler` are equal,
/// two handlers built from identical closures are not.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new(f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Reference equality.
    pub fn same(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn call(&self, payload: &Value) {
        (self.0)(payload)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0))
    }
}

/// Maps channel names to ordered handler lists.
///
/// Cheap to clone; clones share the same registration map.
#[derive(Clone, Default)]
pub struct ChannelDispatcher {
    channels: Arc<Mutex<HashMap<String, Vec<Handler>>>>,
}

impl ChannelDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Handler>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` on `channel`.
    ///
    /// Any previous registration of the same handler on that channel is
    /// removed first, so a handler appears at most once per channel and moves
    /// to the end of the list.
    pub fn register(&self, channel: &str, handler: Handler) -> Registration {
        let mut channels = self.lock();
        remove_handler(&mut channels, channel, &handler);
        channels
            .entry(channel.to_string())
            .or_default()
            .push(handler.clone());
        trace!(target: "clouseau::dispatch", "Registered handler on {}", channel);

        Registration {
            dispatcher: self.clone(),
            channel: channel.to_string(),
            handler,
        }
    }

    /// Remove `handler` from `channel`. Returns true if it was registered.
    ///
    /// The channel entry is dropped once its last handler is gone.
    pub fn unregister(&self, channel: &str, handler: &Handler) -> bool {
        let removed = remove_handler(&mut self.lock(), channel, handler);
        if removed {
            trace!(target: "clouseau::dispatch", "Unregistered handler from {}", channel);
        }
        removed
    }

    /// Invoke every handler on `channel`, in registration order.
    ///
    /// Returns the number of handlers invoked. A channel without handlers is a
    /// silent no-op. The handler list is read before the first call, so
    /// handlers may register or unregister during dispatch.
    pub fn dispatch(&self, channel: &str, payload: &Value) -> usize {
        let handlers = match self.lock().get(channel) {
            Some(handlers) => handlers.clone(),
            None => {
                trace!(target: "clouseau::dispatch", "No handlers for {}", channel);
                return 0;
            }
        };

        for handler in &handlers {
            handler.call(payload);
        }
        handlers.len()
    }

    /// Number of handlers currently registered on `channel`.
    pub fn handler_count(&self, channel: &str) -> usize {
        self.lock().get(channel).map_or(0, Vec::len)
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.lock().contains_key(channel)
    }

    /// Names of all channels with at least one handler.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ChannelDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDispatcher")
            .field("channels", &self.channels())
            .finish()
    }
}

fn remove_handler(
    channels: &mut HashMap<String, Vec<Handler>>,
    channel: &str,
    handler: &Handler,
) -> bool {
    let Some(handlers) = channels.get_mut(channel) else {
        return false;
    };
    let before = handlers.len();
    handlers.retain(|h| !h.same(handler));
    let removed = handlers.len() != before;
    if handlers.is_empty() {
        channels.remove(channel);
    }
    removed
}

/// Handle returned by [`ChannelDispatcher::register`].
///
/// Dropping it leaves the handler registered; call [`Registration::unregister`]
/// to remove it.
#[derive(Debug)]
pub struct Registration {
    dispatcher: ChannelDispatcher,
    channel: String,
    handler: Handler,
}

impl Registration {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Symmetric unregister of the original registration.
    pub fn unregister(self) -> bool {
        self.dispatcher.unregister(&self.channel, &self.handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler() -> (Handler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler = Handler::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[test]
    fn test_register_twice_invokes_once() {
        let dispatcher = ChannelDispatcher::new();
        let (handler, count) = counting_handler();

        dispatcher.register("xterm", handler.clone());
        dispatcher.register("xterm", handler.clone());

        assert_eq!(dispatcher.handler_count("xterm"), 1);
        dispatcher.dispatch("xterm", &json!("data"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_removes_empty_channel() {
        let dispatcher = ChannelDispatcher::new();
        let (handler, count) = counting_handler();

        dispatcher.register("docker/publish", handler.clone());
        assert!(dispatcher.unregister("docker/publish", &handler));
        assert!(!dispatcher.has_channel("docker/publish"));

        assert_eq!(dispatcher.dispatch("docker/publish", &json!({})), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregister_unknown_handler_is_noop() {
        let dispatcher = ChannelDispatcher::new();
        let (a, _) = counting_handler();
        let (b, _) = counting_handler();

        dispatcher.register("ch", a);
        assert!(!dispatcher.unregister("ch", &b));
        assert!(!dispatcher.unregister("other", &b));
        assert_eq!(dispatcher.handler_count("ch"), 1);
    }

    #[test]
    fn test_identical_closures_are_distinct_handlers() {
        let dispatcher = ChannelDispatcher::new();
        let (a, count_a) = counting_handler();
        let (b, count_b) = counting_handler();

        dispatcher.register("ch", a);
        dispatcher.register("ch", b);
        dispatcher.dispatch("ch", &Value::Null);

        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let dispatcher = ChannelDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = order.clone();
            dispatcher.register(
                "ch",
                Handler::new(move |_| order.lock().unwrap().push(name)),
            );
        }
        dispatcher.dispatch("ch", &Value::Null);

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_reregister_moves_handler_to_end() {
        let dispatcher = ChannelDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        let a = Handler::new(move |_| o.lock().unwrap().push("a"));
        let o = order.clone();
        let b = Handler::new(move |_| o.lock().unwrap().push("b"));

        dispatcher.register("ch", a.clone());
        dispatcher.register("ch", b);
        dispatcher.register("ch", a);
        dispatcher.dispatch("ch", &Value::Null);

        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_registration_unregister_closure() {
        let dispatcher = ChannelDispatcher::new();
        let (handler, count) = counting_handler();

        let registration = dispatcher.register("pong", handler);
        assert_eq!(registration.channel(), "pong");
        assert!(registration.unregister());

        dispatcher.dispatch("pong", &json!("ok"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(dispatcher.channels().is_empty());
    }

    #[test]
    fn test_handler_may_unregister_itself_during_dispatch() {
        let dispatcher = ChannelDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        let slot: Arc<Mutex<Option<Handler>>> = Arc::new(Mutex::new(None));
        let d = dispatcher.clone();
        let s = slot.clone();
        let c = count.clone();
        let handler = Handler::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = s.lock().unwrap().as_ref() {
                d.unregister("once", me);
            }
        });
        *slot.lock().unwrap() = Some(handler.clone());

        dispatcher.register("once", handler);
        dispatcher.dispatch("once", &Value::Null);
        dispatcher.dispatch("once", &Value::Null);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!dispatcher.has_channel("once"));
    }

    #[test]
    fn test_payload_passed_through() {
        let dispatcher = ChannelDispatcher::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        dispatcher.register(
            "resp",
            Handler::new(move |payload| *s.lock().unwrap() = Some(payload.clone())),
        );

        dispatcher.dispatch("resp", &json!({"ok": true}));
        assert_eq!(*seen.lock().unwrap(), Some(json!({"ok": true})));
    }
}
