//! Transport abstraction traits for Beacon.
//!
//! A [`Transport`] is one long-lived connection to the hosted pub/sub
//! provider. Lifecycle notifications (`connected`, `disconnected`, `error`)
//! and inbound channel events are delivered in order on the [`EventStream`]
//! returned by [`Transport::connect`].

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Name of the channel event carrying application messages.
pub const MESSAGE_EVENT: &str = "message";

/// Ordered stream of events produced by one open connection.
///
/// The stream ends when the transport drops its sender, which happens on
/// [`Transport::disconnect`] or once the connection is gone for good.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Parameters for opening a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    /// Endpoint override; transports fall back to their configured URL.
    pub url: Option<String>,
    /// Token used for channel authentication.
    pub token: Option<String>,
}

impl ConnectParams {
    /// Parameters carrying a token.
    #[must_use]
    pub fn with_token(token: Option<String>) -> Self {
        Self { url: None, token }
    }
}

/// Handle returned when a channel is subscribed on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    /// Sanitized channel name.
    pub channel: String,
    /// Transport-assigned id for this subscription.
    pub id: u64,
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.channel, self.id)
    }
}

/// An event published on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl ChannelEvent {
    /// Create an application `message` event.
    #[must_use]
    pub fn message(channel: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            event: MESSAGE_EVENT.to_string(),
            payload,
        }
    }
}

/// A lower-level connection fault reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFault {
    /// Short machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Whether reconnecting may succeed.
    pub recoverable: bool,
}

impl TransportFault {
    /// Create a new fault.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Events emitted by an open connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The provider accepted the connection.
    Connected { socket_id: Option<String> },
    /// The connection closed; `reason` is free text from the provider or socket.
    Disconnected { reason: String },
    /// A connection fault.
    Error(TransportFault),
    /// An inbound channel event.
    Message(ChannelEvent),
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No connection is open.
    #[error("Not connected")]
    NotConnected,

    /// An operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The provider refused the request.
    #[error("Rejected ({code}): {message}")]
    Rejected { code: u16, message: String },

    /// Frame codec error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] beacon_protocol::ProtocolError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether retrying the connection may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TransportError::Rejected { .. })
    }
}

/// The connection to the hosted pub/sub provider.
///
/// Implementations hold at most one open connection at a time; calling
/// [`connect`](Transport::connect) again replaces the previous one.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and return its event stream.
    ///
    /// Returning `Ok` does not mean the provider accepted the connection;
    /// that is signalled by [`TransportEvent::Connected`] on the stream.
    async fn connect(&self, params: ConnectParams) -> Result<EventStream, TransportError>;

    /// Subscribe to a (sanitized) channel.
    async fn subscribe(&self, channel: &str) -> Result<ChannelHandle, TransportError>;

    /// Unsubscribe from a channel.
    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError>;

    /// Close the connection and end its event stream. Safe to call when closed.
    async fn disconnect(&self);

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_event_name() {
        let event = ChannelEvent::message("news", serde_json::json!({"type": "headline"}));
        assert_eq!(event.event, MESSAGE_EVENT);
        assert_eq!(event.channel, "news");
    }

    #[test]
    fn test_rejections_are_not_recoverable() {
        let rejected = TransportError::Rejected {
            code: 401,
            message: "bad token".into(),
        };
        assert!(!rejected.is_recoverable());
        assert!(TransportError::Timeout.is_recoverable());
        assert!(TransportError::WebSocket("reset".into()).is_recoverable());
    }

    #[test]
    fn test_display_formats() {
        let handle = ChannelHandle {
            channel: "news".into(),
            id: 3,
        };
        assert_eq!(handle.to_string(), "news#3");

        let fault = TransportFault::new("socket_reset", "peer reset", true);
        assert_eq!(fault.to_string(), "[socket_reset] peer reset");
    }
}
