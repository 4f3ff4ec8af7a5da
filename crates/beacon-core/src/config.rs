//! Client options.
//!
//! Every field has a default, so an empty TOML table or `{}` deserializes
//! into a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backoff::ReconnectPolicy;

/// Environment variable selecting the runtime environment.
pub const ENVIRONMENT_VAR: &str = "BEACON_ENV";

/// Runtime environment.
///
/// Development allows connecting without a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Read the environment from `BEACON_ENV`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(std::env::var(ENVIRONMENT_VAR).ok().as_deref())
    }

    /// Interpret a raw environment value; anything unrecognized is production.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "development" || v == "dev" => Environment::Development,
            _ => Environment::Production,
        }
    }

    #[must_use]
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Options recognized by [`RealtimeClient`](crate::RealtimeClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Transport endpoint override.
    #[serde(default)]
    pub url: Option<String>,

    /// Verbose logging, including payload bodies.
    #[serde(default)]
    pub debug: bool,

    /// Enable automatic reconnection.
    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Reconnection attempts before settling into `Error`.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base backoff delay in milliseconds.
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,

    /// How long `connect()` waits for the provider to accept.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Refresh the access token this many seconds before it expires.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,

    /// Channel used by `send()` when none is given.
    #[serde(default = "default_channel")]
    pub default_channel: String,

    #[serde(default)]
    pub environment: Environment,

    /// Messaging provider key; placeholder values disable connecting.
    #[serde(default)]
    pub provider_key: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay() -> u64 {
    1_000
}

fn default_reconnect_max_delay() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_refresh_margin() -> u64 {
    60
}

fn default_channel() -> String {
    "broadcast".to_string()
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: None,
            debug: false,
            reconnect: default_true(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            connect_timeout_ms: default_connect_timeout(),
            refresh_margin_secs: default_refresh_margin(),
            default_channel: default_channel(),
            environment: Environment::default(),
            provider_key: None,
        }
    }
}

impl ClientOptions {
    /// Options for a development environment.
    #[must_use]
    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            ..Self::default()
        }
    }

    /// Options for a production environment.
    #[must_use]
    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            ..Self::default()
        }
    }

    /// Backoff policy derived from these options.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(self.reconnect_base_delay_ms),
            max: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }
}
