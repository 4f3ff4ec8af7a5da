//! Message types for the realtime client.
//!
//! Outbound messages carry [`SendOptions`]; inbound channel events are
//! delivered to handlers as [`InboundMessage`]s.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Serialized size of a JSON payload in bytes.
#[must_use]
pub fn payload_size(payload: &Value) -> usize {
    payload.to_string().len()
}

/// Opaque handle correlating one `(channel, handler)` registration.
///
/// Structured as `sub_<millis>_<random>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Generate a fresh handle.
    #[must_use]
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        Self(format!("sub_{}_{}", now_millis(), suffix.to_ascii_lowercase()))
    }

    /// Get the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-send options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Destination channel; the client's default channel when `None`.
    pub channel: Option<String>,
    /// Wait for the provider to confirm receipt.
    pub await_acknowledgment: bool,
    /// Upper bound on the acknowledgment wait.
    pub timeout: Option<Duration>,
}

impl SendOptions {
    /// Fire-and-forget to the default channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Send to a specific channel.
    #[must_use]
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Wait for acknowledgment.
    #[must_use]
    pub fn acknowledged(mut self) -> Self {
        self.await_acknowledgment = true;
        self
    }

    /// Wait for acknowledgment, giving up after `timeout`.
    #[must_use]
    pub fn acknowledged_within(mut self, timeout: Duration) -> Self {
        self.await_acknowledgment = true;
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a successful `send()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendReceipt {
    /// The trigger endpoint accepted the message.
    Delivered { message_id: Option<String> },
    /// The client was not connected; the message waits in the queue.
    Queued { depth: usize },
    /// Fire-and-forget send that the trigger endpoint answered with `ok: false`.
    Refused,
}

impl SendReceipt {
    /// Whether the message was queued rather than delivered.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, SendReceipt::Queued { .. })
    }
}

/// A message waiting for the connection to come back.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// Queue-assigned sequence number, increasing in enqueue order.
    pub seq: u64,
    pub message_type: String,
    pub payload: Value,
    pub options: SendOptions,
    /// Milliseconds since the Unix epoch.
    pub enqueued_at: u64,
}

/// A channel event delivered to handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Sanitized channel name.
    pub channel: String,
    /// Transport event name.
    pub event: String,
    /// The payload's `type` field, or the event name when absent.
    pub message_type: String,
    pub payload: Value,
    /// Milliseconds since the Unix epoch.
    pub received_at: u64,
}

impl InboundMessage {
    /// Build an inbound message, deriving its type from the payload.
    #[must_use]
    pub fn new(channel: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        let event = event.into();
        let message_type = payload
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| event.clone());

        Self {
            channel: channel.into(),
            event,
            message_type,
            payload,
            received_at: now_millis(),
        }
    }

    /// Serialized payload size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        payload_size(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_subscription_id_shape() {
        let id = SubscriptionId::generate();
        let parts: Vec<_> = id.as_str().splitn(3, '_').collect();

        assert_eq!(parts[0], "sub");
        assert!(parts[1].parse::<u64>().is_ok());
        assert_eq!(parts[2].len(), 12);
    }

    #[test]
    fn test_unique_subscription_ids() {
        let ids: HashSet<_> = (0..1000).map(|_| SubscriptionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_inbound_type_from_payload() {
        let msg = InboundMessage::new("news", "message", json!({"type": "headline", "n": 1}));
        assert_eq!(msg.message_type, "headline");

        let msg = InboundMessage::new("news", "message", json!({"n": 1}));
        assert_eq!(msg.message_type, "message");
        assert!(msg.size() > 0);
    }

    #[test]
    fn test_send_options_builders() {
        let opts = SendOptions::new()
            .channel("alerts")
            .acknowledged_within(Duration::from_millis(250));

        assert_eq!(opts.channel.as_deref(), Some("alerts"));
        assert!(opts.await_acknowledgment);
        assert_eq!(opts.timeout, Some(Duration::from_millis(250)));
    }
}
