//! Frames spoken over the realtime socket.
//!
//! The client sends [`ClientFrame`]s and the provider answers with
//! [`ServerFrame`]s. Both are internally tagged by a `type` field and
//! serialized with MessagePack by the [`codec`](crate::codec).

use serde::{Deserialize, Serialize};

/// Current protocol version announced in [`ClientFrame::Connect`].
pub const PROTOCOL_VERSION: u8 = 1;

/// Error/close code the provider uses when it rejects the credential.
pub const CLOSE_UNAUTHORIZED: u16 = 401;

/// Parse an event payload.
///
/// Payloads that are not valid JSON are surfaced as a JSON string holding
/// the lossy UTF-8 text.
#[must_use]
pub fn parse_event_payload(payload: &[u8]) -> serde_json::Value {
    serde_json::from_slice(payload).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(payload).into_owned())
    })
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Opening handshake.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
        /// Channel authentication token.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Subscribe to a channel.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request id echoed by the matching `Ack` or `Error`.
        id: u64,
        channel: String,
    },

    /// Unsubscribe from a channel.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request id echoed by the matching `Ack` or `Error`.
        id: u64,
        channel: String,
    },

    /// Keepalive answer to a server `Ping`.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientFrame {
    /// Create a Connect frame for the current protocol version.
    #[must_use]
    pub fn connect(token: Option<String>) -> Self {
        ClientFrame::Connect {
            version: PROTOCOL_VERSION,
            token,
        }
    }

    /// Create a Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, channel: impl Into<String>) -> Self {
        ClientFrame::Subscribe {
            id,
            channel: channel.into(),
        }
    }

    /// Create an Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: u64, channel: impl Into<String>) -> Self {
        ClientFrame::Unsubscribe {
            id,
            channel: channel.into(),
        }
    }

    /// Create a Pong frame echoing a ping timestamp.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ClientFrame::Pong { timestamp }
    }
}

/// Frames sent by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Handshake accepted.
    #[serde(rename = "connected")]
    Connected {
        /// Provider-assigned socket id.
        socket_id: String,
        /// Recommended keepalive interval in milliseconds.
        heartbeat_ms: u32,
    },

    /// An event published on a channel.
    #[serde(rename = "event")]
    Event {
        channel: String,
        event: String,
        /// JSON document, kept as raw bytes on the wire.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// A request succeeded.
    #[serde(rename = "ack")]
    Ack { id: u64 },

    /// A request failed, or a connection-level error (`id == 0`).
    #[serde(rename = "error")]
    Error { id: u64, code: u16, message: String },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// The provider is closing the socket.
    #[serde(rename = "close")]
    Close { code: u16, reason: String },
}

impl ServerFrame {
    /// Create an Event frame from a JSON payload.
    #[must_use]
    pub fn event(
        channel: impl Into<String>,
        event: impl Into<String>,
        payload: &serde_json::Value,
    ) -> Self {
        ServerFrame::Event {
            channel: channel.into(),
            event: event.into(),
            payload: payload.to_string().into_bytes(),
        }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Parse the payload of an `Event` frame; `None` for other frames.
    #[must_use]
    pub fn event_payload(&self) -> Option<serde_json::Value> {
        match self {
            ServerFrame::Event { payload, .. } => Some(parse_event_payload(payload)),
            _ => None,
        }
    }

    /// Whether this frame reports a rejected credential.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ServerFrame::Error { code: CLOSE_UNAUTHORIZED, .. }
                | ServerFrame::Close { code: CLOSE_UNAUTHORIZED, .. }
        )
    }
}
