//! JSON bodies exchanged with the authenticated HTTP endpoints.
//!
//! The realtime client never publishes to the transport directly; outbound
//! events are proxied through a trigger endpoint, and access tokens are
//! renewed through a refresh endpoint. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the trigger endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    /// Destination channel (already sanitized).
    pub channel: String,
    /// Event name the provider publishes under.
    pub event: String,
    /// Application-level message type.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Arbitrary JSON payload.
    pub payload: Value,
}

impl TriggerRequest {
    /// Create a trigger request whose event name is the message type.
    #[must_use]
    pub fn new(channel: impl Into<String>, message_type: impl Into<String>, payload: Value) -> Self {
        let message_type = message_type.into();
        Self {
            channel: channel.into(),
            event: message_type.clone(),
            message_type,
            payload,
        }
    }
}

/// Response body from the trigger endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    /// Whether the provider accepted the event.
    pub ok: bool,
    /// Provider-assigned message id, when one was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl TriggerResponse {
    /// An accepted response with an optional message id.
    #[must_use]
    pub fn accepted(message_id: Option<String>) -> Self {
        Self {
            ok: true,
            message_id,
        }
    }

    /// A response the provider refused.
    #[must_use]
    pub fn refused() -> Self {
        Self {
            ok: false,
            message_id: None,
        }
    }

    /// Whether the event counts as delivered.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.ok
    }
}

/// Request body for the token refresh endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// A fresh access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}
