//! Routing Integration Tests
//!
//! Drives a whole relay over the in-memory transport: clients register,
//! send, reconnect and disconnect, and the relay routes between them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use chat_relay::envelope::{DataMessage, Message, Registration};
use chat_relay::error::ForwardError;
use chat_relay::federation::Forwarder;
use chat_relay::transport::{send_message, MuxConnection};

mod common;

use common::{connect_client, start_memory_relay, wait_for};

#[derive(Default)]
struct RecordingForwarder {
    calls: Mutex<Vec<(DataMessage, String)>>,
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, message: &DataMessage, server: &str) -> Result<(), ForwardError> {
        self.calls
            .lock()
            .unwrap()
            .push((message.clone(), server.to_string()));
        Ok(())
    }
}

/// Test: alice and bob on one relay, alice's message reaches bob once
#[tokio::test]
async fn test_local_message_delivered_exactly_once() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let (relay, connector) = start_memory_relay("S1", forwarder.clone());

    let alice = connect_client(&relay, &connector, "alice").await;
    let bob = connect_client(&relay, &connector, "bob").await;
    let (mut inbox, _errors) = bob.receive(CancellationToken::new());

    alice
        .send_to("bob@S1".parse().unwrap(), "hi")
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .expect("bob should receive the message")
        .unwrap();
    assert_eq!(received.from.to_string(), "alice@S1");
    assert_eq!(received.to.to_string(), "bob@S1");
    assert_eq!(received.data, "hi");

    let duplicate = tokio::time::timeout(Duration::from_millis(100), inbox.recv()).await;
    assert!(duplicate.is_err(), "Message must be delivered only once");
    assert!(forwarder.calls.lock().unwrap().is_empty());
    assert_eq!(relay.metrics.messages_delivered.get(), 1);

    relay.shutdown().await;
}

/// Test: messages for another server go to the forwarder untouched
#[tokio::test]
async fn test_remote_message_is_forwarded() {
    let forwarder = Arc::new(RecordingForwarder::default());
    let (relay, connector) = start_memory_relay("S1", forwarder.clone());
    let alice = connect_client(&relay, &connector, "alice").await;

    let sent = alice
        .send_to("carol@S2".parse().unwrap(), "hello")
        .await
        .unwrap();

    let calls = forwarder.clone();
    wait_for(move || !calls.calls.lock().unwrap().is_empty()).await;
    let calls = forwarder.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![(sent, "S2".to_string())]);

    relay.shutdown().await;
}

/// Test: a message for an unknown local client is dropped
#[tokio::test]
async fn test_unknown_recipient_is_dropped() {
    let (relay, connector) = start_memory_relay("S1", Arc::new(RecordingForwarder::default()));
    let alice = connect_client(&relay, &connector, "alice").await;

    alice
        .send_to("nobody@S1".parse().unwrap(), "anyone?")
        .await
        .unwrap();

    let metrics = relay.metrics.clone();
    wait_for(move || metrics.messages_dropped.get() == 1).await;
    assert_eq!(relay.metrics.messages_delivered.get(), 0);

    relay.shutdown().await;
}

/// Test: re-registering from a new connection evicts the old one
#[tokio::test]
async fn test_reregistration_moves_identity() {
    let (relay, connector) = start_memory_relay("S1", Arc::new(RecordingForwarder::default()));

    let first = connector.connect().await.unwrap();
    send_message(
        first.as_ref(),
        &Message::Registration(Registration::announce("alice", "S1")),
    )
    .await
    .unwrap();
    wait_for(|| relay.registry.lookup_by_client("alice").is_ok()).await;

    let second = connector.connect().await.unwrap();
    send_message(
        second.as_ref(),
        &Message::Registration(Registration::announce("alice", "S1")),
    )
    .await
    .unwrap();

    wait_for(|| first.is_closed()).await;
    wait_for(|| relay.registry.lookup_by_address(&second.local_address()).is_some()).await;
    assert!(relay.registry.lookup_by_address(&first.local_address()).is_none());
    assert_eq!(relay.registry.connected_count(), 1);

    // Delivery follows the identity to its new connection.
    let bob = connect_client(&relay, &connector, "bob").await;
    bob.send_to("alice@S1".parse().unwrap(), "found you")
        .await
        .unwrap();

    let stream = tokio::time::timeout(Duration::from_secs(2), second.accept_stream())
        .await
        .unwrap()
        .unwrap();
    let received = stream.read_message(4096).await.unwrap().into_data().unwrap();
    assert_eq!(received.data, "found you");
    assert!(!second.is_closed());

    relay.shutdown().await;
}

/// Test: a disconnected client stops resolving
#[tokio::test]
async fn test_disconnect_removes_registration() {
    let (relay, connector) = start_memory_relay("S1", Arc::new(RecordingForwarder::default()));
    let alice = connect_client(&relay, &connector, "alice").await;
    let bob = connect_client(&relay, &connector, "bob").await;

    bob.close();
    wait_for(|| relay.registry.lookup_by_client("bob").is_err()).await;
    assert_eq!(relay.registry.connected_count(), 1);

    alice
        .send_to("bob@S1".parse().unwrap(), "still there?")
        .await
        .unwrap();
    let metrics = relay.metrics.clone();
    wait_for(move || metrics.messages_dropped.get() == 1).await;

    relay.shutdown().await;
}

/// Test: many clients exchanging messages all receive theirs
#[tokio::test]
async fn test_many_clients_each_receive_their_message() {
    let (relay, connector) = start_memory_relay("S1", Arc::new(RecordingForwarder::default()));
    let sender = connect_client(&relay, &connector, "sender").await;

    let mut inboxes = Vec::new();
    for i in 0..10 {
        let client = connect_client(&relay, &connector, &format!("user{}", i)).await;
        let (inbox, _errors) = client.receive(CancellationToken::new());
        inboxes.push((client, inbox));
    }

    for i in 0..10 {
        sender
            .send_to(format!("user{}@S1", i).parse().unwrap(), format!("msg {}", i))
            .await
            .unwrap();
    }

    for (i, (_client, inbox)) in inboxes.iter_mut().enumerate() {
        let received = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
            .await
            .expect("each client should receive its message")
            .unwrap();
        assert_eq!(received.data, format!("msg {}", i));
        assert_eq!(received.from.to_string(), "sender@S1");
    }

    relay.shutdown().await;
}
