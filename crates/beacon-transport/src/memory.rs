//! In-process transport.
//!
//! [`MemoryTransport`] stands in for the hosted provider without touching
//! the network. It records every call made against it and lets the owner
//! inject lifecycle and channel events, which makes it the transport of
//! choice for tests and for running the agent offline.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::traits::{
    ChannelEvent, ChannelHandle, ConnectParams, EventStream, Transport, TransportError,
    TransportEvent, TransportFault,
};

#[derive(Debug, Default)]
struct MemoryState {
    sender: Option<mpsc::UnboundedSender<TransportEvent>>,
    live_channels: HashSet<String>,
    connect_tokens: Vec<Option<String>>,
    subscribe_calls: Vec<String>,
    unsubscribe_calls: Vec<String>,
    disconnect_calls: usize,
    next_handle: u64,
    fail_next_connect: Option<TransportError>,
    fail_next_subscribe: Option<TransportError>,
}

/// A scriptable in-process transport.
#[derive(Debug)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    auto_connect: bool,
}

impl MemoryTransport {
    /// Create a transport that reports `Connected` as soon as it is opened.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            auto_connect: true,
        }
    }

    /// Create a transport that waits for [`emit_connected`](Self::emit_connected).
    #[must_use]
    pub fn manual() -> Self {
        Self {
            auto_connect: false,
            ..Self::new()
        }
    }

    /// Make the next `connect` call fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.state.lock().fail_next_connect = Some(error);
    }

    /// Make the next `subscribe` call fail with `error`.
    ///
    /// The failure is reported after a yield, so concurrent callers see the
    /// subscribe in flight.
    pub fn fail_next_subscribe(&self, error: TransportError) {
        self.state.lock().fail_next_subscribe = Some(error);
    }

    /// Push an event onto the open connection's stream.
    ///
    /// Returns `false` if no connection is open.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let state = self.state.lock();
        match &state.sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Report the connection as accepted.
    pub fn emit_connected(&self) -> bool {
        self.emit(TransportEvent::Connected {
            socket_id: Some("memory".to_string()),
        })
    }

    /// Report the connection as closed by the provider.
    ///
    /// The event stream ends after this event and live channels are dropped,
    /// as they would be with a real socket.
    pub fn emit_disconnected(&self, reason: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        let Some(sender) = state.sender.take() else {
            return false;
        };
        state.live_channels.clear();
        sender
            .send(TransportEvent::Disconnected {
                reason: reason.into(),
            })
            .is_ok()
    }

    /// Report a connection fault.
    pub fn emit_error(&self, fault: TransportFault) -> bool {
        self.emit(TransportEvent::Error(fault))
    }

    /// Deliver a `message` event on a channel.
    pub fn deliver(&self, channel: &str, payload: serde_json::Value) -> bool {
        self.emit(TransportEvent::Message(ChannelEvent::message(channel, payload)))
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().sender.is_some()
    }

    /// Number of `connect` calls made so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_tokens.len()
    }

    /// Tokens passed to each `connect` call, in order.
    #[must_use]
    pub fn connect_tokens(&self) -> Vec<Option<String>> {
        self.state.lock().connect_tokens.clone()
    }

    /// Channel names passed to `subscribe`, in order.
    #[must_use]
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.state.lock().subscribe_calls.clone()
    }

    /// Channel names passed to `unsubscribe`, in order.
    #[must_use]
    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.state.lock().unsubscribe_calls.clone()
    }

    /// Number of `disconnect` calls made so far.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnect_calls
    }

    /// Whether a channel is subscribed on the open connection.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.state.lock().live_channels.contains(channel)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, params: ConnectParams) -> Result<EventStream, TransportError> {
        let mut state = self.state.lock();
        state.connect_tokens.push(params.token);

        if let Some(error) = state.fail_next_connect.take() {
            debug!(error = %error, "Memory transport refusing connection");
            return Err(error);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        if self.auto_connect {
            let _ = sender.send(TransportEvent::Connected {
                socket_id: Some("memory".to_string()),
            });
        }
        state.sender = Some(sender);
        state.live_channels.clear();

        debug!(auto_connect = self.auto_connect, "Memory transport opened");
        Ok(receiver)
    }

    async fn subscribe(&self, channel: &str) -> Result<ChannelHandle, TransportError> {
        let failure = {
            let mut state = self.state.lock();
            if state.sender.is_none() {
                return Err(TransportError::NotConnected);
            }
            state.subscribe_calls.push(channel.to_string());
            state.fail_next_subscribe.take()
        };
        if let Some(error) = failure {
            tokio::task::yield_now().await;
            return Err(error);
        }

        let mut state = self.state.lock();
        state.live_channels.insert(channel.to_string());
        state.next_handle += 1;

        trace!(channel = %channel, "Memory transport subscribed");
        Ok(ChannelHandle {
            channel: channel.to_string(),
            id: state.next_handle,
        })
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.unsubscribe_calls.push(channel.to_string());
        state.live_channels.remove(channel);

        trace!(channel = %channel, "Memory transport unsubscribed");
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock();
        state.disconnect_calls += 1;
        state.sender = None;
        state.live_channels.clear();
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
