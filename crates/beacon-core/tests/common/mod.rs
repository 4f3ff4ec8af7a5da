//! Shared fixtures for client scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use beacon_core::{
    ApiError, AuthApi, ClientOptions, ConnectionError, ConnectionState, MemoryTokenStore,
    RealtimeClient, TokenStore, TriggerApi,
};
use beacon_protocol::{TokenPair, TriggerRequest, TriggerResponse};
use beacon_transport::MemoryTransport;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Scripted trigger outcome.
pub enum Outcome {
    Respond(Result<TriggerResponse, ApiError>),
    /// Never answer.
    Hang,
}

/// Trigger endpoint that records requests and replays a script.
///
/// Requests beyond the script are accepted.
#[derive(Default)]
pub struct MockTrigger {
    requests: Mutex<Vec<TriggerRequest>>,
    script: Mutex<VecDeque<Outcome>>,
}

impl MockTrigger {
    pub fn push(&self, outcome: Outcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn fail_next(&self, error: ApiError) {
        self.push(Outcome::Respond(Err(error)));
    }

    pub fn requests(&self) -> Vec<TriggerRequest> {
        self.requests.lock().clone()
    }

    pub fn request_types(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.message_type.clone())
            .collect()
    }
}

#[async_trait]
impl TriggerApi for MockTrigger {
    async fn trigger(&self, request: &TriggerRequest) -> Result<TriggerResponse, ApiError> {
        let seq = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len()
        };
        let next = self.script.lock().pop_front();
        match next {
            Some(Outcome::Respond(result)) => result,
            Some(Outcome::Hang) => std::future::pending().await,
            None => Ok(TriggerResponse::accepted(Some(format!("msg-{}", seq)))),
        }
    }
}

/// Refresh endpoint returning a configured result.
#[derive(Default)]
pub struct MockAuth {
    result: Mutex<Option<Result<TokenPair, ApiError>>>,
    calls: Mutex<Vec<String>>,
    count: AtomicUsize,
}

impl MockAuth {
    pub fn respond_with(&self, result: Result<TokenPair, ApiError>) {
        *self.result.lock() = Some(result);
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl AuthApi for MockAuth {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(refresh_token.to_string());
        let result = self.result.lock().clone();
        result.unwrap_or_else(|| Err(ApiError::Rejected("refresh token expired".into())))
    }
}

pub struct Harness {
    pub client: RealtimeClient,
    pub transport: Arc<MemoryTransport>,
    pub trigger: Arc<MockTrigger>,
    pub auth: Arc<MockAuth>,
    pub store: Arc<MemoryTokenStore>,
}

impl Harness {
    pub fn new(options: ClientOptions) -> Self {
        Self::with_parts(options, MemoryTransport::new(), MemoryTokenStore::new())
    }

    /// Transport that only reports `Connected` when told to.
    pub fn manual(options: ClientOptions) -> Self {
        Self::with_parts(options, MemoryTransport::manual(), MemoryTokenStore::new())
    }

    pub fn with_store(options: ClientOptions, store: MemoryTokenStore) -> Self {
        Self::with_parts(options, MemoryTransport::new(), store)
    }

    fn with_parts(options: ClientOptions, transport: MemoryTransport, store: MemoryTokenStore) -> Self {
        let transport = Arc::new(transport);
        let trigger = Arc::new(MockTrigger::default());
        let auth = Arc::new(MockAuth::default());
        let store = Arc::new(store);

        let client = RealtimeClient::builder()
            .options(options)
            .transport(transport.clone())
            .auth_api(auth.clone())
            .trigger_api(trigger.clone())
            .token_store(store.clone())
            .build()
            .unwrap();

        Self {
            client,
            transport,
            trigger,
            auth,
            store,
        }
    }

    pub async fn connect(&self) {
        self.client
            .connect(Some(DEV_TOKEN.to_string()))
            .await
            .unwrap();
        assert_eq!(self.client.state(), ConnectionState::Connected);
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }
}

/// A token that is never refreshed.
pub const DEV_TOKEN: &str = "test-token";

/// Production options without reconnection.
pub fn options() -> ClientOptions {
    ClientOptions {
        reconnect: false,
        ..ClientOptions::production()
    }
}

/// Production options with reconnection.
pub fn reconnecting_options() -> ClientOptions {
    ClientOptions::production()
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// A JWT-shaped token expiring at `exp`.
pub fn jwt(exp: u64) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user-1","exp":{}}}"#, exp))
    )
}

/// Let spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub fn record_states(client: &RealtimeClient) -> Arc<Mutex<Vec<ConnectionState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _keep = client.on_state_change(move |state| sink.lock().push(state));
    seen
}

pub fn record_errors(client: &RealtimeClient) -> Arc<Mutex<Vec<ConnectionError>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _keep = client.on_error(move |error| sink.lock().push(error.clone()));
    seen
}

pub fn error_codes(errors: &Mutex<Vec<ConnectionError>>) -> Vec<String> {
    errors.lock().iter().map(|e| e.code.clone()).collect()
}
