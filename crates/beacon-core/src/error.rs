//! Error types for the realtime client.

use beacon_transport::{TransportError, TransportFault};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::api::ApiError;
use crate::message::now_millis;

/// Errors returned by [`RealtimeClient`](crate::RealtimeClient) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No token could be resolved and the environment requires one.
    #[error("Authentication required: no access token available")]
    AuthenticationRequired,

    /// An acknowledgment-mode send did not complete in time.
    #[error("Message timed out after {}ms", .0.as_millis())]
    MessageTimeout(Duration),

    /// The provider did not accept the connection in time.
    #[error("Connection timed out after {0}ms")]
    ConnectTimeout(u64),

    /// The connection closed before the operation completed.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The trigger endpoint answered but did not accept the message.
    #[error("Message was not acknowledged")]
    NotAcknowledged,

    /// The channel name is empty after sanitization.
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// A transport subscribe this call had joined failed.
    #[error("Subscribe to {channel:?} failed: {reason}")]
    SubscribeFailed { channel: String, reason: String },

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Collaborator failure, propagated unchanged.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The client was built with missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Error codes carried by [`ConnectionError`].
pub mod codes {
    pub const TRANSPORT_ERROR: &str = "transport_error";
    pub const CONNECT_FAILED: &str = "connect_failed";
    pub const CONNECT_TIMEOUT: &str = "connect_timeout";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const RECONNECT_EXHAUSTED: &str = "reconnect_exhausted";
    pub const FLUSH_FAILED: &str = "flush_failed";
    pub const SUBSCRIBE_FAILED: &str = "subscribe_failed";
}

/// Structured error delivered to `on_error` observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionError {
    pub code: String,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Whether reconnecting may succeed.
    pub recoverable: bool,
}

impl ConnectionError {
    /// Create an error stamped with the current time.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: now_millis(),
            recoverable,
        }
    }

    /// Wrap a fault reported by the transport.
    #[must_use]
    pub fn from_fault(fault: &TransportFault) -> Self {
        Self::new(
            codes::TRANSPORT_ERROR,
            fault.to_string(),
            fault.recoverable,
        )
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
