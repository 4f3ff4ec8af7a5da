//! Channel subscriptions.
//!
//! A channel is a named topic on the transport. Several logical handlers may
//! share one transport subscription; the [`ChannelSubscription`] tracks them.

use beacon_transport::ChannelHandle;
use tokio::sync::oneshot;

use crate::handlers::MessageHandler;
use crate::message::SubscriptionId;

/// Strip every character outside `[A-Za-z0-9-]`.
#[must_use]
pub fn sanitize_channel_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

/// Sanitize a channel name, rejecting names that end up empty.
///
/// # Errors
///
/// Returns the raw name if nothing survives sanitization.
pub fn validate_channel_name(name: &str) -> Result<String, String> {
    let sanitized = sanitize_channel_name(name);
    if sanitized.is_empty() {
        return Err(name.to_string());
    }
    Ok(sanitized)
}

/// Whether the transport holds this channel in the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Not subscribed on the transport.
    Unbound,
    /// A transport subscribe is in flight for the given session.
    Pending(u64),
    /// Subscribed on the transport.
    Bound(ChannelHandle),
}

/// A subscriber waiting on a transport subscribe started by someone else.
pub(crate) type BindJoiner = (SubscriptionId, oneshot::Sender<Result<(), String>>);

/// A sanitized channel and the handlers registered on it.
pub struct ChannelSubscription {
    raw_name: String,
    handlers: Vec<(SubscriptionId, MessageHandler)>,
    pub(crate) binding: Binding,
    /// Settled with the pending bind.
    pub(crate) joiners: Vec<BindJoiner>,
}

impl ChannelSubscription {
    pub(crate) fn new(raw_name: impl Into<String>) -> Self {
        Self {
            raw_name: raw_name.into(),
            handlers: Vec::new(),
            binding: Binding::Unbound,
            joiners: Vec::new(),
        }
    }

    /// The name first used to subscribe.
    #[must_use]
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// Number of handlers registered on this channel.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// The transport handle, once subscribed in the current session.
    #[must_use]
    pub fn transport_handle(&self) -> Option<&ChannelHandle> {
        match &self.binding {
            Binding::Bound(handle) => Some(handle),
            _ => None,
        }
    }

    pub(crate) fn add_handler(&mut self, id: SubscriptionId, handler: MessageHandler) {
        self.handlers.push((id, handler));
    }

    /// Remove a handler; returns `true` if it was present.
    pub(crate) fn remove_handler(&mut self, id: &SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(existing, _)| existing != id);
        self.handlers.len() != before
    }

    /// Resolve every joiner with success.
    pub(crate) fn release_joiners(&mut self) {
        for (_, joiner) in self.joiners.drain(..) {
            let _ = joiner.send(Ok(()));
        }
    }

    /// Handlers in registration order.
    pub(crate) fn handlers(&self) -> Vec<MessageHandler> {
        self.handlers.iter().map(|(_, h)| h.clone()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sanitize_strips_disallowed_characters() {
        assert_eq!(sanitize_channel_name("test-channel$%^&*()"), "test-channel");
        assert_eq!(sanitize_channel_name("private:room_42"), "privateroom42");
        assert_eq!(sanitize_channel_name("Ünïcode-ok"), "ncode-ok");
    }

    #[test]
    fn test_validate_rejects_empty_result() {
        assert_eq!(validate_channel_name("news").unwrap(), "news");
        assert_eq!(validate_channel_name("$%^").unwrap_err(), "$%^");
        assert!(validate_channel_name("").is_err());
    }

    #[test]
    fn test_handler_bookkeeping() {
        let mut sub = ChannelSubscription::new("news!");
        let a = SubscriptionId::from("sub_1_a");
        let b = SubscriptionId::from("sub_1_b");

        sub.add_handler(a.clone(), Arc::new(|_| {}));
        sub.add_handler(b.clone(), Arc::new(|_| {}));
        assert_eq!(sub.handler_count(), 2);
        assert_eq!(sub.raw_name(), "news!");
        assert!(sub.transport_handle().is_none());

        assert!(sub.remove_handler(&a));
        assert!(!sub.remove_handler(&a));
        assert!(sub.remove_handler(&b));
        assert!(sub.is_empty());
    }
}
