//! Agent configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`beacon.toml` and friends)
//! - Environment variables (`BEACON__*`, `__` separates nesting levels)
//!
//! ```toml
//! channels = ["news", "alerts"]
//! token_file = "~/.config/beacon/tokens.json"
//!
//! [client]
//! url = "wss://realtime.example.com/ws"
//! default_channel = "broadcast"
//!
//! [api]
//! base_url = "https://api.example.com"
//! ```

use anyhow::{Context, Result};
use beacon_core::ClientOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file locations, in lookup order.
pub const CONFIG_PATHS: [&str; 3] = [
    "beacon.toml",
    "/etc/beacon/beacon.toml",
    "~/.config/beacon/beacon.toml",
];

/// Prefix for environment overrides, e.g. `BEACON__CLIENT__DEBUG=true`.
pub const ENV_PREFIX: &str = "BEACON";

/// Environment variable carrying an explicit access token.
pub const TOKEN_VAR: &str = "BEACON_TOKEN";

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Realtime client options.
    #[serde(default)]
    pub client: ClientOptions,

    /// Authenticated HTTP endpoints.
    #[serde(default)]
    pub api: ApiConfig,

    /// Transport selection.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Where access and refresh tokens are persisted.
    #[serde(default = "default_token_file")]
    pub token_file: String,

    /// Channels subscribed at startup.
    #[serde(default)]
    pub channels: Vec<String>,

    /// How often statistics are exported, in milliseconds.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL the endpoint paths are appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Token refresh endpoint.
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Realtime trigger endpoint.
    #[serde(default = "default_trigger_path")]
    pub trigger_path: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Which transport the client drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Websocket,
    /// In-process transport; nothing leaves the machine.
    Memory,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_kind")]
    pub kind: TransportKind,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_token_file() -> String {
    "~/.config/beacon/tokens.json".to_string()
}

fn default_stats_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_trigger_path() -> String {
    "/realtime/trigger".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_transport_kind() -> TransportKind {
    TransportKind::Websocket
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            client: ClientOptions::default(),
            api: ApiConfig::default(),
            transport: TransportConfig::default(),
            token_file: default_token_file(),
            channels: Vec::new(),
            stats_interval_ms: default_stats_interval(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            refresh_path: default_refresh_path(),
            trigger_path: default_trigger_path(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the first existing default path, with
    /// environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            tracing::debug!(path = %path.display(), "Using config file");
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("channels")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AgentConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// The token file with `~` expanded.
    #[must_use]
    pub fn token_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.token_file).as_ref())
    }

    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }

    /// Explicit token from `BEACON_TOKEN`, if set and non-empty.
    #[must_use]
    pub fn env_token() -> Option<String> {
        std::env::var(TOKEN_VAR)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

impl ApiConfig {
    #[must_use]
    pub fn refresh_url(&self) -> String {
        join_url(&self.base_url, &self.refresh_path)
    }

    #[must_use]
    pub fn trigger_url(&self) -> String {
        join_url(&self.base_url, &self.trigger_path)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.transport.kind, TransportKind::Websocket);
        assert_eq!(config.metrics.port, 9090);
        assert_eq!(config.stats_interval(), Duration::from_secs(30));
        assert!(config.channels.is_empty());
        assert_eq!(config.client.default_channel, "broadcast");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            channels = ["news", "alerts"]
            stats_interval_ms = 5000

            [client]
            url = "wss://rt.example.com/ws"
            max_reconnect_attempts = 8

            [api]
            base_url = "https://api.example.com/"

            [transport]
            kind = "memory"
        "#;

        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.channels, vec!["news", "alerts"]);
        assert_eq!(config.client.url.as_deref(), Some("wss://rt.example.com/ws"));
        assert_eq!(config.client.max_reconnect_attempts, 8);
        assert!(config.client.reconnect);
        assert_eq!(config.transport.kind, TransportKind::Memory);
        assert_eq!(
            config.api.trigger_url(),
            "https://api.example.com/realtime/trigger"
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "token_file = \"/tmp/beacon-tokens.json\"").unwrap();

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.token_path(), PathBuf::from("/tmp/beacon-tokens.json"));
    }

    #[test]
    fn test_from_file_reports_path() {
        let err = AgentConfig::from_file("/nonexistent/beacon.toml").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/beacon.toml"));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://a/", "/b"), "http://a/b");
        assert_eq!(join_url("http://a", "b"), "http://a/b");
    }
}
