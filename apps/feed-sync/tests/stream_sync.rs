//! Stream Synchronization Integration Tests
//!
//! Drives a full [`FeedSync`] session against a mock backend and checks
//! that push connections follow the local subscription set.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use feed_sync::infrastructure::config::{ApiSettings, StreamSettings};
use feed_sync::{ChannelKind, ConnectionState, FeedSync, InstrumentKey, SyncConfig};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

fn config(server: &MockServer) -> SyncConfig {
    SyncConfig {
        api: ApiSettings {
            base_url: server.uri(),
            ..ApiSettings::default()
        },
        stream: StreamSettings {
            reconnect_delay: Duration::from_secs(60),
            ..StreamSettings::default()
        },
    }
}

fn keys(raw: &[&str]) -> Vec<InstrumentKey> {
    raw.iter().copied().map(InstrumentKey::from).collect()
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_owned(), "text/event-stream")
}

async fn mount_ack(server: &MockServer, endpoint: &str, status: u16) {
    Mock::given(method("POST"))
        .and(path(format!("/api/v1/feed/{endpoint}")))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"message": "done"})))
        .mount(server)
        .await;
}

async fn mount_stream(server: &MockServer, channel: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/stream/{channel}")))
        .respond_with(sse(body))
        .mount(server)
        .await;
}

fn instruments(request: &Request) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(name, _)| name == "instruments")
        .map(|(_, value)| value.into_owned())
}

/// Poll the server log until a request to `channel` matches `expected`.
async fn wait_for_stream(server: &MockServer, channel: &str, expected: Option<&str>) {
    let target = format!("/api/v1/stream/{channel}");
    tokio::time::timeout(WAIT, async {
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests
                .iter()
                .any(|r| r.url.path() == target && instruments(r).as_deref() == expected)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {target} request with instruments {expected:?}"));
}

// =============================================================================
// Subscribe / Unsubscribe
// =============================================================================

#[tokio::test]
async fn subscribe_opens_filtered_streams_and_merges_quotes() {
    let server = MockServer::start().await;
    mount_ack(&server, "subscribe", 200).await;
    mount_stream(
        &server,
        "live",
        "data: {\"type\":\"live_feed\",\"feeds\":{\"A\":{\"ltpc\":{\"ltp\":101.5,\"cp\":100.0}}}}\n\n",
    )
    .await;
    mount_stream(&server, "candles", "").await;
    mount_stream(&server, "vwap", "").await;

    let session = FeedSync::start(config(&server)).unwrap();
    let mut updates = session.quotes().subscribe();

    assert!(session.subscribe(&keys(&["B", "A"])).await);

    let update = tokio::time::timeout(WAIT, updates.recv())
        .await
        .expect("quote update")
        .unwrap();
    assert_eq!(update.key, InstrumentKey::from("A"));
    assert!((update.record.change - 1.5).abs() < 1e-9);

    wait_for_stream(&server, "live", Some("A,B")).await;
    wait_for_stream(&server, "candles", Some("A,B")).await;
    wait_for_stream(&server, "vwap", Some("A,B")).await;
}

#[tokio::test]
async fn failed_unsubscribe_still_narrows_streams() {
    let server = MockServer::start().await;
    mount_ack(&server, "subscribe", 200).await;
    mount_ack(&server, "unsubscribe", 500).await;
    mount_stream(&server, "live", "").await;
    mount_stream(&server, "candles", "").await;
    mount_stream(&server, "vwap", "").await;

    let session = FeedSync::start(config(&server)).unwrap();
    assert!(session.subscribe(&keys(&["A", "B"])).await);
    wait_for_stream(&server, "live", Some("A,B")).await;

    assert!(!session.unsubscribe(&keys(&["B"])).await);

    let local = session.subscriptions();
    assert_eq!(local.keys(), keys(&["A"]));
    wait_for_stream(&server, "live", Some("A")).await;
}

#[tokio::test]
async fn unsubscribing_everything_closes_streams() {
    let server = MockServer::start().await;
    mount_ack(&server, "subscribe", 200).await;
    mount_ack(&server, "unsubscribe", 200).await;
    mount_stream(&server, "live", "").await;
    mount_stream(&server, "candles", "").await;
    mount_stream(&server, "vwap", "").await;

    let session = FeedSync::start(config(&server)).unwrap();
    let mut live = session.watch_state(ChannelKind::LiveQuote);

    session.subscribe(&keys(&["A"])).await;
    wait_for_stream(&server, "live", Some("A")).await;

    session.unsubscribe(&keys(&["A"])).await;
    tokio::time::timeout(WAIT, live.wait_for(|s| *s == ConnectionState::Closed))
        .await
        .expect("live channel closed")
        .unwrap();
    assert!(session.subscriptions().is_empty());
}

// =============================================================================
// Backend Sync
// =============================================================================

#[tokio::test]
async fn sync_adopts_backend_list() {
    let server = MockServer::start().await;
    mount_ack(&server, "subscribe", 200).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/feed/subscriptions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"count": 2, "subscriptions": ["X", "Y"]})),
        )
        .mount(&server)
        .await;
    mount_stream(&server, "live", "").await;
    mount_stream(&server, "candles", "").await;
    mount_stream(&server, "vwap", "").await;

    let session = FeedSync::start(config(&server)).unwrap();
    session.subscribe(&keys(&["LOCAL"])).await;

    assert_eq!(session.sync_subscriptions().await.unwrap(), 2);

    let local = session.subscriptions();
    assert!(!local.contains(&InstrumentKey::from("LOCAL")));
    assert_eq!(local.keys(), keys(&["X", "Y"]));
    wait_for_stream(&server, "live", Some("X,Y")).await;
}

#[tokio::test]
async fn failed_sync_keeps_local_set() {
    let server = MockServer::start().await;
    mount_ack(&server, "subscribe", 200).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/feed/subscriptions"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let session = FeedSync::start(config(&server)).unwrap();
    session.subscribe(&keys(&["A"])).await;

    let err = session.sync_subscriptions().await.unwrap_err();
    assert_eq!(err.status(), Some(502));
    assert_eq!(session.subscriptions().keys(), keys(&["A"]));
}

// =============================================================================
// Order Channel
// =============================================================================

#[tokio::test]
async fn order_channel_streams_without_filter() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "orders",
        "event: order\ndata: {\"order_id\":\"OID-1\",\"status\":\"open\",\"quantity\":10,\"filled_quantity\":4}\n\n",
    )
    .await;

    let session = FeedSync::start(config(&server)).unwrap();
    let mut updates = session.orders().subscribe();

    session.open_orders();

    let update = tokio::time::timeout(WAIT, updates.recv())
        .await
        .expect("order update")
        .unwrap();
    assert_eq!(update.record.pending_quantity, 6);
    assert_eq!(update.record.status, "open");
    wait_for_stream(&server, "orders", None).await;

    session.close_orders();
    assert_eq!(
        *session.watch_state(ChannelKind::OrderUpdate).borrow(),
        ConnectionState::Closed
    );
}
