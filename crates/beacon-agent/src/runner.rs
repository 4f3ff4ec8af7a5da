//! The agent loop.
//!
//! Wires the configured transport, HTTP collaborators and file token store
//! into a [`RealtimeClient`], subscribes the configured channels, then
//! forwards JSON lines from stdin as outbound messages until Ctrl-C.

use crate::config::{AgentConfig, TransportKind};
use crate::http::HttpApi;
use crate::metrics::{self, StatsExporter};
use crate::store::FileTokenStore;
use anyhow::{bail, Context, Result};
use beacon_core::{
    ClientError, InboundMessage, RealtimeClient, SendOptions, SendReceipt, TokenStore,
    ACCESS_TOKEN_KEY,
};
use beacon_transport::{MemoryTransport, Transport, WebSocketConfig, WebSocketTransport};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

/// One outbound message read from stdin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutboundLine {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub channel: Option<String>,
}

/// Parse a stdin line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns an error if the line is not a JSON object with a `type` field.
pub fn parse_line(line: &str) -> Result<Option<OutboundLine>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

fn build_transport(config: &AgentConfig) -> Arc<dyn Transport> {
    match config.transport.kind {
        TransportKind::Websocket => {
            let defaults = WebSocketConfig::default();
            Arc::new(WebSocketTransport::new(WebSocketConfig {
                url: config.client.url.clone().unwrap_or(defaults.url),
                max_message_size: config.transport.max_message_size,
                request_timeout: defaults.request_timeout,
            }))
        }
        TransportKind::Memory => Arc::new(MemoryTransport::new()),
    }
}

/// Build a client from the agent configuration.
///
/// An explicit `token` is persisted to the store so trigger calls carry it.
///
/// # Errors
///
/// Returns an error if a collaborator cannot be constructed or the client
/// options are inconsistent.
pub fn build_client(config: &AgentConfig, token: Option<&str>) -> Result<RealtimeClient> {
    let store = Arc::new(FileTokenStore::open(config.token_path()));
    if let Some(token) = token {
        if let Err(e) = store.set(ACCESS_TOKEN_KEY, token) {
            warn!(path = %store.path().display(), error = %e, "Failed to persist token");
        }
    }

    let api = Arc::new(
        HttpApi::new(&config.api, store.clone()).context("Failed to create HTTP client")?,
    );
    let transport = build_transport(config);
    info!(transport = transport.name(), "Transport selected");

    let client = RealtimeClient::builder()
        .options(config.client.clone())
        .transport(transport)
        .auth_api(api.clone())
        .trigger_api(api)
        .token_store(store)
        .build()?;
    Ok(client)
}

/// Send one stdin line.
///
/// # Errors
///
/// Returns an error if the line is malformed or the send fails.
pub async fn handle_line(client: &RealtimeClient, line: &str) -> Result<Option<SendReceipt>> {
    let Some(outbound) = parse_line(line).context("Expected {\"type\", \"payload\", \"channel\"?}")?
    else {
        return Ok(None);
    };

    let mut options = SendOptions::new();
    options.channel = outbound.channel;
    let receipt = client
        .send(&outbound.message_type, outbound.payload, options)
        .await?;
    Ok(Some(receipt))
}

fn log_message(message: &InboundMessage) {
    info!(
        channel = %message.channel,
        message_type = %message.message_type,
        payload = %message.payload,
        "Message"
    );
}

/// Run the agent until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the client cannot be built or no credential is
/// available.
pub async fn run(config: AgentConfig) -> Result<()> {
    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let token = AgentConfig::env_token();
    let client = build_client(&config, token.as_deref())?;

    let stop_states = client.on_state_change(|state| {
        metrics::record_state(state);
        info!(state = %state, "Connection state changed");
    });
    let stop_errors = client.on_error(|error| {
        metrics::record_error(error);
        warn!(code = %error.code, recoverable = error.recoverable, "{}", error.message);
    });

    match client.connect(token).await {
        Ok(()) => {}
        Err(ClientError::AuthenticationRequired) => {
            bail!("No access token: set BEACON_TOKEN or store one in {}", config.token_file)
        }
        // Reconnection, when enabled, keeps trying in the background.
        Err(e) => warn!(error = %e, "Initial connection failed"),
    }

    let mut subscriptions = Vec::with_capacity(config.channels.len());
    for channel in &config.channels {
        match client.subscribe(channel, log_message).await {
            Ok(id) => {
                info!(channel = %channel, subscription = %id, "Subscribed");
                subscriptions.push(id);
            }
            Err(e) => warn!(channel = %channel, error = %e, "Subscribe failed"),
        }
    }

    let mut exporter = StatsExporter::new();
    let mut ticker = tokio::time::interval(config.stats_interval());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let stats = client.stats();
                debug!(
                    sent = stats.messages_sent,
                    received = stats.messages_received,
                    queued = client.queue_len(),
                    state = %stats.connection_state,
                    "Stats"
                );
                if config.metrics.enabled {
                    exporter.export(&stats);
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match handle_line(&client, &line).await {
                    Ok(Some(receipt)) => debug!(receipt = ?receipt, "Sent"),
                    Ok(None) => {}
                    Err(e) => warn!(error = %format!("{:#}", e), "Send failed"),
                },
                Ok(None) => {
                    debug!("stdin closed");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
        }
    }

    for id in &subscriptions {
        if let Err(e) = client.unsubscribe(id).await {
            debug!(subscription = %id, error = %e, "Unsubscribe failed");
        }
    }
    client.disconnect(Some("agent shutdown")).await;
    stop_states();
    stop_errors();

    let stats = client.stats();
    info!(
        sent = stats.messages_sent,
        received = stats.messages_received,
        "Agent stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{ClientOptions, ConnectionState};
    use serde_json::json;

    fn offline_config(dir: &tempfile::TempDir) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.client = ClientOptions::development();
        config.transport.kind = TransportKind::Memory;
        config.metrics.enabled = false;
        config.token_file = dir.path().join("tokens.json").display().to_string();
        config
    }

    #[test]
    fn test_parse_line() {
        let line = parse_line(r#"{"type":"chat","payload":{"text":"hi"},"channel":"lobby"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(line.message_type, "chat");
        assert_eq!(line.payload, json!({"text": "hi"}));
        assert_eq!(line.channel.as_deref(), Some("lobby"));

        let bare = parse_line(r#"{"type":"ping"}"#).unwrap().unwrap();
        assert_eq!(bare.payload, Value::Null);
        assert_eq!(bare.channel, None);
    }

    #[test]
    fn test_parse_blank_and_invalid_lines() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert!(parse_line(r#"{"payload":1}"#).is_err());
        assert!(parse_line("hello").is_err());
    }

    #[tokio::test]
    async fn test_offline_line_is_queued() {
        let dir = tempfile::tempdir().unwrap();
        let client = build_client(&offline_config(&dir), None).unwrap();

        let receipt = handle_line(&client, r#"{"type":"chat","payload":{"n":1}}"#)
            .await
            .unwrap();

        assert_eq!(receipt, Some(SendReceipt::Queued { depth: 1 }));
        assert_eq!(client.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_memory_transport_connects() {
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config(&dir);
        let client = build_client(&config, Some("dev-local")).unwrap();

        client.connect(None).await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);

        let stored = FileTokenStore::open(config.token_path());
        assert_eq!(stored.get(ACCESS_TOKEN_KEY).as_deref(), Some("dev-local"));

        client.disconnect(None).await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_malformed_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = build_client(&offline_config(&dir), None).unwrap();

        assert!(handle_line(&client, "{").await.is_err());
        assert_eq!(client.queue_len(), 0);
    }
}
