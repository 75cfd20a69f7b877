//! Federation Integration Tests
//!
//! Covers the HTTP hop between relays: the forwarder's request, the task
//! endpoint, and a message crossing from one relay to another.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use chat_relay::envelope::{DataMessage, Message};
use chat_relay::federation::{Forwarder, HttpForwarder, TASKS_PATH};

mod common;

use common::{connect_client, serve_http, start_capturing_peer, start_federated_relay, wait_for};

/// Test: the forwarder posts exactly the encoded envelope
#[tokio::test]
async fn test_forwarder_posts_identical_envelope() {
    let mut peer = start_capturing_peer().await;
    let mut peers = HashMap::new();
    peers.insert("S2".to_string(), peer.url.clone());
    let forwarder = HttpForwarder::new(peers);

    let message = DataMessage::new(
        "alice@S1".parse().unwrap(),
        "carol@S2".parse().unwrap(),
        "hello carol",
    )
    .with_id("42");
    forwarder.forward(&message, "S2").await.unwrap();

    let body = tokio::time::timeout(Duration::from_secs(2), peer.bodies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body, message.encode().unwrap());
    assert_eq!(
        Message::decode(&body).unwrap(),
        Message::Data(message.clone())
    );
    assert!(peer.bodies.try_recv().is_err(), "Exactly one request expected");
}

/// Test: a relay forwards a remote-addressed message once, unmodified
#[tokio::test]
async fn test_relay_forwards_to_peer_task_endpoint() {
    let mut peer = start_capturing_peer().await;
    let mut peers = HashMap::new();
    peers.insert("S2".to_string(), peer.url.clone());
    let (relay, connector) = start_federated_relay("S1", peers);
    let alice = connect_client(&relay, &connector, "alice").await;

    let sent = alice
        .send_to("carol@S2".parse().unwrap(), "over the wire")
        .await
        .unwrap();

    let body = tokio::time::timeout(Duration::from_secs(2), peer.bodies.recv())
        .await
        .expect("peer should receive a task")
        .unwrap();
    assert_eq!(body, sent.encode().unwrap());

    let metrics = relay.metrics.clone();
    wait_for(move || metrics.messages_forwarded.get() == 1).await;
    let extra = tokio::time::timeout(Duration::from_millis(100), peer.bodies.recv()).await;
    assert!(extra.is_err(), "Exactly one request expected");

    relay.shutdown().await;
}

/// Test: alice@S1 reaches carol@S2 through two relays
#[tokio::test]
async fn test_message_crosses_two_relays() {
    let (s2, s2_connector) = start_federated_relay("S2", HashMap::new());
    let s2_url = serve_http(&s2).await;

    let mut peers = HashMap::new();
    peers.insert("S2".to_string(), s2_url);
    let (s1, s1_connector) = start_federated_relay("S1", peers);

    let alice = connect_client(&s1, &s1_connector, "alice").await;
    let carol = connect_client(&s2, &s2_connector, "carol").await;
    let (mut inbox, _errors) = carol.receive(CancellationToken::new());

    alice
        .send_to("carol@S2".parse().unwrap(), "hi from S1")
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .expect("carol should receive the message")
        .unwrap();
    assert_eq!(received.from.to_string(), "alice@S1");
    assert_eq!(received.data, "hi from S1");
    assert_eq!(s2.metrics.messages_delivered.get(), 1);

    s1.shutdown().await;
    s2.shutdown().await;
}

/// Test: the task endpoint rejects bodies that are not envelopes
#[tokio::test]
async fn test_task_endpoint_rejects_malformed_body() {
    let (relay, _connector) = start_federated_relay("S2", HashMap::new());
    let url = serve_http(&relay).await;

    let response = reqwest::Client::new()
        .post(format!("{}{}", url, TASKS_PATH))
        .body("definitely not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = reqwest::Client::new()
        .get(format!("{}/v1/queue", url))
        .send()
        .await
        .unwrap();
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["depth"], 0);
    assert_eq!(json["capacity"], 8);

    relay.shutdown().await;
}
