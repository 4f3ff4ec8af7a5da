//! Channel registry.
//!
//! Maps sanitized channel names to their subscriptions and subscription
//! handles back to channels. The registry is plain bookkeeping: it decides
//! when the transport must be called, the client makes the calls.

use beacon_transport::ChannelHandle;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::channel::{validate_channel_name, BindJoiner, Binding, ChannelSubscription};
use crate::handlers::MessageHandler;
use crate::message::SubscriptionId;

/// Result of registering a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Registration {
    pub id: SubscriptionId,
    /// Sanitized channel name.
    pub channel: String,
}

/// Result of removing a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Removal {
    pub channel: String,
    /// Set when the last handler left a channel bound on the transport.
    pub release: Option<ChannelHandle>,
}

/// What to do with a completed transport subscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BindOutcome {
    /// The channel is now bound.
    Bound,
    /// Every handler left while the subscribe was in flight.
    Orphaned,
    /// The session changed or another bind won; nothing to do.
    Stale,
}

#[derive(Default)]
pub(crate) struct ChannelRegistry {
    channels: HashMap<String, ChannelSubscription>,
    index: HashMap<SubscriptionId, String>,
}

impl ChannelRegistry {
    /// Register a handler on a channel.
    pub(crate) fn register(
        &mut self,
        raw_name: &str,
        handler: MessageHandler,
    ) -> Result<Registration, String> {
        let channel = validate_channel_name(raw_name)?;
        let id = SubscriptionId::generate();

        let entry = self
            .channels
            .entry(channel.clone())
            .or_insert_with(|| ChannelSubscription::new(raw_name));
        entry.add_handler(id.clone(), handler);
        self.index.insert(id.clone(), channel.clone());

        debug!(
            channel = %channel,
            subscription = %id,
            handlers = entry.handler_count(),
            "Handler registered"
        );

        Ok(Registration { id, channel })
    }

    /// Remove a handler. Unknown ids return `None`.
    pub(crate) fn remove(&mut self, id: &SubscriptionId) -> Option<Removal> {
        let channel = self.index.remove(id)?;
        let entry = self.channels.get_mut(&channel)?;
        entry.remove_handler(id);

        if !entry.is_empty() {
            return Some(Removal {
                channel,
                release: None,
            });
        }

        let release = self
            .channels
            .remove(&channel)
            .and_then(|entry| match entry.binding {
                Binding::Bound(handle) => Some(handle),
                _ => None,
            });
        debug!(channel = %channel, "Channel released");
        Some(Removal { channel, release })
    }

    /// Claim an unbound channel for a transport subscribe in `session`.
    ///
    /// Returns `false` if the channel is unknown, bound, or already pending.
    pub(crate) fn begin_bind(&mut self, channel: &str, session: u64) -> bool {
        match self.channels.get_mut(channel) {
            Some(entry) if entry.binding == Binding::Unbound => {
                entry.binding = Binding::Pending(session);
                true
            }
            _ => false,
        }
    }

    /// Wait on the transport subscribe in flight for `channel`, if any.
    ///
    /// The receiver settles when that bind does: `Err` means the bind failed
    /// and `id` has been removed.
    pub(crate) fn join_bind(
        &mut self,
        channel: &str,
        id: &SubscriptionId,
    ) -> Option<oneshot::Receiver<Result<(), String>>> {
        let entry = self.channels.get_mut(channel)?;
        if !matches!(entry.binding, Binding::Pending(_)) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        entry.joiners.push((id.clone(), tx));
        Some(rx)
    }

    /// Claim every unbound channel for `session`.
    pub(crate) fn claim_unbound(&mut self, session: u64) -> Vec<String> {
        let mut claimed: Vec<String> = self
            .channels
            .iter_mut()
            .filter(|(_, entry)| entry.binding == Binding::Unbound)
            .map(|(name, entry)| {
                entry.binding = Binding::Pending(session);
                name.clone()
            })
            .collect();
        claimed.sort();
        claimed
    }

    /// Record a successful transport subscribe.
    pub(crate) fn complete_bind(
        &mut self,
        channel: &str,
        session: u64,
        handle: ChannelHandle,
    ) -> BindOutcome {
        match self.channels.get_mut(channel) {
            None => BindOutcome::Orphaned,
            Some(entry) if entry.binding == Binding::Pending(session) => {
                entry.binding = Binding::Bound(handle);
                entry.release_joiners();
                BindOutcome::Bound
            }
            Some(_) => BindOutcome::Stale,
        }
    }

    /// Record a failed transport subscribe.
    ///
    /// Subscribers that joined the bind are removed and returned so the
    /// caller can hand them the failure.
    pub(crate) fn fail_bind(&mut self, channel: &str, session: u64) -> Vec<BindJoiner> {
        let joiners = match self.channels.get_mut(channel) {
            Some(entry) if entry.binding == Binding::Pending(session) => {
                entry.binding = Binding::Unbound;
                std::mem::take(&mut entry.joiners)
            }
            _ => return Vec::new(),
        };
        for (id, _) in &joiners {
            self.remove(id);
        }
        joiners
    }

    /// Forget transport bindings after the connection is gone.
    ///
    /// Joined subscribers keep their handlers and are told they succeeded;
    /// the channel binds again on the next connect.
    pub(crate) fn reset_bindings(&mut self) {
        for entry in self.channels.values_mut() {
            entry.binding = Binding::Unbound;
            entry.release_joiners();
        }
    }

    /// Handlers for a channel, in registration order.
    pub(crate) fn handlers_for(&self, channel: &str) -> Vec<MessageHandler> {
        self.channels
            .get(channel)
            .map(ChannelSubscription::handlers)
            .unwrap_or_default()
    }

    pub(crate) fn get(&self, channel: &str) -> Option<&ChannelSubscription> {
        self.channels.get(channel)
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }
}
