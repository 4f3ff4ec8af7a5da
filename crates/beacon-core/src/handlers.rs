//! Handler and observer registries.
//!
//! Handlers run synchronously on the client's event flow. A handler that
//! panics is logged and skipped; the remaining handlers still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use crate::error::ConnectionError;
use crate::message::InboundMessage;
use crate::state::ConnectionState;

/// Callback for inbound channel messages.
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Callback invoked after every state transition.
pub type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Callback invoked for every structured connection error.
pub type ErrorObserver = Arc<dyn Fn(&ConnectionError) + Send + Sync>;

/// Run a callback, containing any panic it raises.
///
/// Returns `false` if the callback panicked.
pub(crate) fn invoke_isolated(kind: &str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic".to_string());
            warn!(handler = kind, panic = %detail, "Handler panicked");
            false
        }
    }
}

/// Observers keyed by registration id, kept in registration order.
pub(crate) struct ObserverSet<T> {
    next_id: u64,
    entries: Vec<(u64, T)>,
}

impl<T: Clone> ObserverSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    /// Register an observer, returning its id.
    pub(crate) fn add(&mut self, observer: T) -> u64 {
        self.next_id += 1;
        self.entries.push((self.next_id, observer));
        self.next_id
    }

    /// Remove the observer registered under `id`.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Clone the observers out, in registration order.
    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.entries.iter().map(|(_, o)| o.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Message handlers keyed by message type.
///
/// Each type maps to a set of handlers identified by `Arc` pointer, kept in
/// registration order.
#[derive(Default)]
pub(crate) struct TypeHandlers {
    by_type: HashMap<String, Vec<MessageHandler>>,
}

impl TypeHandlers {
    /// Add a handler; adding the same handler twice is a no-op.
    pub(crate) fn add(&mut self, message_type: &str, handler: MessageHandler) -> bool {
        let handlers = self.by_type.entry(message_type.to_string()).or_default();
        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Remove a handler; removing an unknown handler is a no-op.
    pub(crate) fn remove(&mut self, message_type: &str, handler: &MessageHandler) -> bool {
        let Some(handlers) = self.by_type.get_mut(message_type) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.by_type.remove(message_type);
        }
        removed
    }

    /// Handlers registered for `message_type`, in registration order.
    pub(crate) fn handlers_for(&self, message_type: &str) -> Vec<MessageHandler> {
        self.by_type
            .get(message_type)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, message_type: &str) -> usize {
        self.by_type.get(message_type).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_observer_set_order_and_removal() {
        let mut set: ObserverSet<&'static str> = ObserverSet::new();
        let a = set.add("a");
        let _b = set.add("b");
        let _c = set.add("c");

        assert_eq!(set.snapshot(), vec!["a", "b", "c"]);
        assert!(set.remove(a));
        assert!(!set.remove(a));
        assert_eq!(set.snapshot(), vec!["b", "c"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_type_handlers_are_sets() {
        let mut handlers = TypeHandlers::default();
        let h: MessageHandler = Arc::new(|_| {});

        assert!(handlers.add("chat", h.clone()));
        assert!(!handlers.add("chat", h.clone()));
        assert_eq!(handlers.count("chat"), 1);

        assert!(handlers.remove("chat", &h));
        assert!(!handlers.remove("chat", &h));
        assert!(!handlers.remove("unknown", &h));
        assert_eq!(handlers.count("chat"), 0);
    }

    #[test]
    fn test_invoke_isolated_contains_panics() {
        let calls = AtomicUsize::new(0);

        assert!(!invoke_isolated("test", || panic!("boom")));
        assert!(invoke_isolated("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
