//! Connection lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of the realtime connection.
///
/// Exactly one value is held by a client at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection; the initial state and the result of `disconnect()`.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The provider accepted the connection.
    Connected,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// Failed; stays here until `connect()` is called again.
    Error,
}

impl ConnectionState {
    /// Every state, in declaration order.
    pub const ALL: [ConnectionState; 5] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Reconnecting,
        ConnectionState::Error,
    ];

    /// Whether messages can be delivered right now.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Whether a new connection attempt may start from this state.
    #[must_use]
    pub fn can_connect(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Reconnecting | ConnectionState::Error
        )
    }

    /// Lowercase name, as used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connectable_states() {
        let connectable: Vec<_> = ConnectionState::ALL
            .into_iter()
            .filter(|s| s.can_connect())
            .collect();
        assert_eq!(
            connectable,
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Reconnecting,
                ConnectionState::Error
            ]
        );
    }

    #[test]
    fn test_serialized_names_match_display() {
        for state in ConnectionState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }
}
