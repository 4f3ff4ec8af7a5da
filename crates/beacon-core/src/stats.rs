//! Delivery statistics.

use serde::Serialize;

use crate::state::ConnectionState;

/// Counters kept by the client since construction. Never decremented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reconnect_attempts: u64,
    /// Mirrors the client's current state.
    pub connection_state: ConnectionState,
}

impl Stats {
    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let mut stats = Stats::default();
        stats.record_sent(10);
        stats.record_sent(5);
        stats.record_received(7);

        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.bytes_sent, 15);
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.bytes_received, 7);
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(Stats::default()).unwrap();
        assert_eq!(json["connectionState"], "disconnected");
        assert_eq!(json["messagesSent"], 0);
    }
}
