//! Channel registry and inbound dispatch scenarios.

mod common;

use beacon_core::{ClientError, InboundMessage, MessageHandler, SubscriptionId};
use beacon_transport::{ChannelEvent, TransportError, TransportEvent};
use common::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counter() -> (Arc<AtomicUsize>, impl Fn(&InboundMessage) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let sink = count.clone();
    (count, move |_: &InboundMessage| {
        sink.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn test_subscribe_sanitizes_channel_name() {
    let h = Harness::new(options());
    h.connect().await;

    h.client
        .subscribe("test-channel$%^&*()", |_| {})
        .await
        .unwrap();

    assert_eq!(h.transport.subscribe_calls(), vec!["test-channel"]);
    assert_eq!(h.client.channel_handler_count("test-channel"), 1);
}

#[tokio::test]
async fn test_shared_channel_subscribes_once() {
    let h = Harness::new(options());
    h.connect().await;

    let (a, b, c) = tokio::join!(
        h.client.subscribe("test-channel", |_| {}),
        h.client.subscribe("test-channel", |_| {}),
        h.client.subscribe("test-channel!", |_| {}),
    );
    let ids: Vec<SubscriptionId> = vec![a.unwrap(), b.unwrap(), c.unwrap()];

    assert_eq!(h.transport.subscribe_calls(), vec!["test-channel"]);
    assert_eq!(h.client.channel_handler_count("test-channel"), 3);

    h.client.unsubscribe(&ids[0]).await.unwrap();
    h.client.unsubscribe(&ids[1]).await.unwrap();
    assert!(h.transport.unsubscribe_calls().is_empty());
    assert!(h.transport.is_subscribed("test-channel"));

    h.client.unsubscribe(&ids[2]).await.unwrap();
    assert_eq!(h.transport.unsubscribe_calls(), vec!["test-channel"]);
    assert_eq!(h.client.channel_count(), 0);
}

#[tokio::test]
async fn test_unknown_unsubscribe_is_noop() {
    let h = Harness::new(options());
    h.connect().await;
    let id = h.client.subscribe("news", |_| {}).await.unwrap();

    h.client.unsubscribe(&id).await.unwrap();
    h.client.unsubscribe(&id).await.unwrap();
    h.client
        .unsubscribe(&SubscriptionId::from("sub_0_unknown"))
        .await
        .unwrap();

    assert_eq!(h.transport.unsubscribe_calls(), vec!["news"]);
}

#[tokio::test]
async fn test_invalid_channel_rejected() {
    let h = Harness::new(options());
    h.connect().await;

    let result = h.client.subscribe("$%^&", |_| {}).await;

    assert!(matches!(result, Err(ClientError::InvalidChannel(name)) if name == "$%^&"));
    assert!(h.transport.subscribe_calls().is_empty());
    assert_eq!(h.client.channel_count(), 0);
}

#[tokio::test]
async fn test_subscribe_before_connect_binds_on_connect() {
    let h = Harness::new(options());

    h.client.subscribe("news", |_| {}).await.unwrap();
    assert!(h.transport.subscribe_calls().is_empty());

    h.connect().await;
    settle().await;
    assert_eq!(h.transport.subscribe_calls(), vec!["news"]);
    assert!(h.transport.is_subscribed("news"));
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_survive_reconnect() {
    let h = Harness::new(reconnecting_options());
    h.connect().await;
    let (received, handler) = counter();
    h.client.subscribe("news", handler).await.unwrap();

    h.transport.emit_disconnected("network lost");
    settle().await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.transport.subscribe_calls(), vec!["news", "news"]);
    assert!(h.transport.is_subscribed("news"));

    h.transport.deliver("news", json!({"n": 1}));
    settle().await;
    assert_eq!(received.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_bind_rolls_back() {
    let h = Harness::new(options());
    h.connect().await;

    // Close the transport behind the client's back.
    beacon_transport::Transport::disconnect(h.transport.as_ref()).await;
    let result = h.client.subscribe("news", |_| {}).await;

    assert!(matches!(result, Err(ClientError::Transport(_))));
    assert_eq!(h.client.channel_handler_count("news"), 0);
    assert_eq!(h.client.channel_count(), 0);
}

#[tokio::test]
async fn test_joined_subscribe_fails_with_the_bind() {
    let h = Harness::new(options());
    h.connect().await;
    h.transport
        .fail_next_subscribe(TransportError::Rejected {
            code: 403,
            message: "forbidden".into(),
        });

    let (first, second) = tokio::join!(
        h.client.subscribe("news", |_| {}),
        h.client.subscribe("news!", |_| {}),
    );

    assert!(matches!(first, Err(ClientError::Transport(_))));
    match second {
        Err(ClientError::SubscribeFailed { channel, reason }) => {
            assert_eq!(channel, "news");
            assert!(reason.contains("forbidden"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(h.transport.subscribe_calls(), vec!["news"]);
    assert_eq!(h.client.channel_handler_count("news"), 0);
    assert_eq!(h.client.channel_count(), 0);

    // Nothing stale is left: the next subscribe binds afresh.
    h.client.subscribe("news", |_| {}).await.unwrap();
    assert_eq!(h.transport.subscribe_calls(), vec!["news", "news"]);
    assert!(h.transport.is_subscribed("news"));
}

#[tokio::test]
async fn test_dispatch_order_and_stats() {
    let h = Harness::new(options());
    h.connect().await;
    let order = Arc::new(Mutex::new(Vec::new()));

    for label in ["first", "second"] {
        let sink = order.clone();
        h.client
            .subscribe("news", move |_| sink.lock().push(label))
            .await
            .unwrap();
    }
    let sink = order.clone();
    let by_type: MessageHandler = Arc::new(move |msg: &InboundMessage| {
        assert_eq!(msg.message_type, "headline");
        sink.lock().push("type");
    });
    h.client.on("headline", by_type);

    assert!(h.transport.deliver("news", json!({"type": "headline", "title": "hi"})));
    settle().await;

    assert_eq!(*order.lock(), vec!["first", "second", "type"]);
    let stats = h.client.stats();
    assert_eq!(stats.messages_received, 1);
    assert!(stats.bytes_received > 0);
}

#[tokio::test]
async fn test_panicking_handler_is_isolated() {
    let h = Harness::new(options());
    h.connect().await;
    let (received, handler) = counter();

    h.client
        .subscribe("news", |_| panic!("handler failure"))
        .await
        .unwrap();
    h.client.subscribe("news", handler).await.unwrap();

    h.transport.deliver("news", json!({"n": 1}));
    h.transport.deliver("news", json!({"n": 2}));
    settle().await;

    assert_eq!(received.load(Ordering::SeqCst), 2);
    assert_eq!(h.client.stats().messages_received, 2);
}

#[tokio::test]
async fn test_on_off_are_idempotent() {
    let h = Harness::new(options());
    h.connect().await;
    let (received, handler) = counter();
    let handler: MessageHandler = Arc::new(handler);

    h.client.on("ping", handler.clone());
    h.client.on("ping", handler.clone());
    assert_eq!(h.client.type_handler_count("ping"), 1);

    h.transport.deliver("any", json!({"type": "ping"}));
    settle().await;
    assert_eq!(received.load(Ordering::SeqCst), 1);

    h.client.off("ping", &handler);
    h.client.off("ping", &handler);
    h.client.off("never-registered", &handler);
    assert_eq!(h.client.type_handler_count("ping"), 0);

    h.transport.deliver("any", json!({"type": "ping"}));
    settle().await;
    assert_eq!(received.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_type_falls_back_to_event_name() {
    let h = Harness::new(options());
    h.connect().await;
    let (received, handler) = counter();
    h.client.on("message", Arc::new(handler));

    h.transport.deliver("news", json!({"n": 1}));
    settle().await;

    assert_eq!(received.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_non_message_events_are_ignored() {
    let h = Harness::new(options());
    h.connect().await;
    let (received, handler) = counter();
    h.client.subscribe("news", handler).await.unwrap();

    h.transport.emit(TransportEvent::Message(ChannelEvent {
        channel: "news".into(),
        event: "presence".into(),
        payload: json!({"user": "a"}),
    }));
    settle().await;

    assert_eq!(received.load(Ordering::SeqCst), 0);
    assert_eq!(h.client.stats().messages_received, 0);
}

#[tokio::test]
async fn test_unsubscribed_handler_stops_receiving() {
    let h = Harness::new(options());
    h.connect().await;
    let (received, handler) = counter();
    let id = h.client.subscribe("news", handler).await.unwrap();
    let _keep = h.client.subscribe("news", |_| {}).await.unwrap();

    h.client.unsubscribe(&id).await.unwrap();
    h.transport.deliver("news", json!({"n": 1}));
    settle().await;

    assert_eq!(received.load(Ordering::SeqCst), 0);
    assert_eq!(h.client.stats().messages_received, 1);
}
