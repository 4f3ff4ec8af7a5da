//! HTTP collaborators.
//!
//! [`HttpApi`] implements both [`AuthApi`] and [`TriggerApi`] against the
//! authenticated REST endpoints. Bodies are the camelCase JSON types from
//! `beacon-protocol`.

use async_trait::async_trait;
use beacon_core::{ApiError, AuthApi, TokenStore, TriggerApi, ACCESS_TOKEN_KEY};
use beacon_protocol::{RefreshRequest, TokenPair, TriggerRequest, TriggerResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::ApiConfig;

/// Longest error body echoed into an [`ApiError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// REST client for the refresh and trigger endpoints.
pub struct HttpApi {
    client: reqwest::Client,
    refresh_url: String,
    trigger_url: String,
    tokens: Arc<dyn TokenStore>,
}

impl HttpApi {
    /// Create a client for `config`. Trigger calls carry the access token
    /// currently held by `tokens`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenStore>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("beacon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            refresh_url: config.refresh_url(),
            trigger_url: config.trigger_url(),
            tokens,
        })
    }

    async fn post<B, R>(&self, url: &str, body: &B, bearer: Option<String>) -> Result<R, ApiError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        trace!(url = %url, status = status.as_u16(), "HTTP response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                truncate(body.trim(), MAX_ERROR_BODY)
            };
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

fn network_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Network(format!("request timed out: {}", e))
    } else {
        ApiError::Network(e.to_string())
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl AuthApi for HttpApi {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        debug!(url = %self.refresh_url, "Refreshing access token");
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        self.post(&self.refresh_url, &body, None).await
    }
}

#[async_trait]
impl TriggerApi for HttpApi {
    async fn trigger(&self, request: &TriggerRequest) -> Result<TriggerResponse, ApiError> {
        let bearer = self.tokens.get(ACCESS_TOKEN_KEY);
        self.post(&self.trigger_url, request, bearer).await
    }
}
