//! Token expiry tracking and refresh.

mod common;

use beacon_core::{ApiError, MemoryTokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use beacon_protocol::TokenPair;
use common::*;
use std::time::Duration;

fn pair(access: &str, refresh: &str) -> TokenPair {
    TokenPair {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
    }
}

#[tokio::test]
async fn test_jwt_schedules_refresh() {
    let h = Harness::new(options());
    let exp = now_secs() + 3600;

    h.client.connect(Some(jwt(exp))).await.unwrap();

    assert!(h.client.has_refresh_timer());
    assert_eq!(h.client.token_expiry(), Some(exp));
}

#[tokio::test]
async fn test_dev_token_is_never_refreshed() {
    let h = Harness::new(options());
    h.connect().await;

    assert!(!h.client.has_refresh_timer());
    let expiry = h.client.token_expiry().unwrap();
    assert!(expiry > now_secs() + 364 * 24 * 60 * 60);
}

#[tokio::test]
async fn test_opaque_token_is_never_refreshed() {
    let h = Harness::new(options());

    h.client.schedule_token_refresh("opaque-session-key");

    assert!(!h.client.has_refresh_timer());
    assert!(h.client.token_expiry().is_some());
}

#[tokio::test]
async fn test_disconnect_cancels_refresh() {
    let h = Harness::new(options());
    h.client
        .connect(Some(jwt(now_secs() + 3600)))
        .await
        .unwrap();

    h.client.disconnect(None).await;

    assert!(!h.client.has_refresh_timer());
}

#[tokio::test]
async fn test_refresh_without_refresh_token() {
    let h = Harness::new(options());

    assert_eq!(h.client.refresh_token_with_api().await, None);
    assert_eq!(h.auth.call_count(), 0);
}

#[tokio::test]
async fn test_refresh_success_persists_tokens() {
    let store = MemoryTokenStore::with_tokens(None, Some("refresh-1"));
    let h = Harness::with_store(options(), store);
    let fresh = jwt(now_secs() + 7200);
    h.auth.respond_with(Ok(pair(&fresh, "refresh-2")));

    let token = h.client.refresh_token_with_api().await;

    assert_eq!(token.as_deref(), Some(fresh.as_str()));
    assert_eq!(h.auth.refresh_tokens_seen(), vec!["refresh-1"]);
    assert_eq!(h.stored(ACCESS_TOKEN_KEY).as_deref(), Some(fresh.as_str()));
    assert_eq!(h.stored(REFRESH_TOKEN_KEY).as_deref(), Some("refresh-2"));
    assert!(h.client.has_refresh_timer());
}

#[tokio::test]
async fn test_refresh_failure_returns_none() {
    let store = MemoryTokenStore::with_tokens(Some("old-access"), Some("refresh-1"));
    let h = Harness::with_store(options(), store);
    h.auth
        .respond_with(Err(ApiError::Network("connection reset".into())));

    assert_eq!(h.client.refresh_token_with_api().await, None);
    assert_eq!(h.stored(ACCESS_TOKEN_KEY).as_deref(), Some("old-access"));
    assert_eq!(h.stored(REFRESH_TOKEN_KEY).as_deref(), Some("refresh-1"));
}

#[tokio::test(start_paused = true)]
async fn test_timer_refreshes_before_expiry() {
    let store = MemoryTokenStore::with_tokens(None, Some("refresh-1"));
    let h = Harness::with_store(options(), store);
    h.auth.respond_with(Ok(pair("test-renewed", "refresh-2")));

    h.client
        .connect(Some(jwt(now_secs() + 120)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(h.auth.call_count(), 0);

    tokio::time::sleep(Duration::from_secs(35)).await;
    settle().await;
    assert_eq!(h.auth.call_count(), 1);
    assert_eq!(h.stored(ACCESS_TOKEN_KEY).as_deref(), Some("test-renewed"));
    assert!(!h.client.has_refresh_timer());
}

#[tokio::test(start_paused = true)]
async fn test_rescheduling_replaces_timer() {
    let store = MemoryTokenStore::with_tokens(None, Some("refresh-1"));
    let h = Harness::with_store(options(), store);
    h.auth.respond_with(Ok(pair("test-renewed", "refresh-2")));
    let token = jwt(now_secs() + 90);

    h.client.schedule_token_refresh(&token);
    h.client.schedule_token_refresh(&token);

    tokio::time::sleep(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(h.auth.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_token_refreshes_immediately() {
    let store = MemoryTokenStore::with_tokens(None, Some("refresh-1"));
    let h = Harness::with_store(options(), store);
    h.auth.respond_with(Ok(pair("test-renewed", "refresh-2")));

    h.client.schedule_token_refresh(&jwt(now_secs().saturating_sub(10)));
    tokio::time::sleep(Duration::from_millis(1)).await;
    settle().await;

    assert_eq!(h.auth.call_count(), 1);
}
