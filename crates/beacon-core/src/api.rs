//! Collaborators consumed by the client.
//!
//! The client never talks HTTP or touches disk itself. Token refresh,
//! message publishing and token persistence are delegated to the traits in
//! this module, so any compatible backend can be substituted.

use async_trait::async_trait;
use beacon_protocol::{TokenPair, TriggerRequest, TriggerResponse};
use dashmap::DashMap;
use std::io;
use thiserror::Error;

/// Token store key holding the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Token store key holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Collaborator failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("{0}")]
    Network(String),

    /// The endpoint answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The endpoint refused the credential or request.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The response body could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Exchanges a refresh token for a fresh token pair.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;
}

/// Publishes outbound messages through the authenticated trigger endpoint.
#[async_trait]
pub trait TriggerApi: Send + Sync {
    async fn trigger(&self, request: &TriggerRequest) -> Result<TriggerResponse, ApiError>;
}

/// Key-value persistence for the access and refresh tokens.
pub trait TokenStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be persisted.
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
}

/// Token store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: DashMap<String, String>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given access and refresh tokens.
    #[must_use]
    pub fn with_tokens(access: Option<&str>, refresh: Option<&str>) -> Self {
        let store = Self::new();
        if let Some(access) = access {
            store.values.insert(ACCESS_TOKEN_KEY.to_string(), access.to_string());
        }
        if let Some(refresh) = refresh {
            store.values.insert(REFRESH_TOKEN_KEY.to_string(), refresh.to_string());
        }
        store
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
