//! QUIC Integration Tests
//!
//! Runs the relay on a real QUIC endpoint with a self-signed certificate
//! and talks to it through `RelayClient`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::PrivateKeyDer;
use tokio_util::sync::CancellationToken;

use chat_relay::envelope::DataMessage;
use chat_relay::error::ForwardError;
use chat_relay::federation::Forwarder;
use chat_relay::quic_transport::{self, QuicListener, QuicTimers};
use chat_relay::tls;
use chat_relay::transport::MuxListener;
use chat_relay::{Relay, RelayClient};

mod common;

use common::{test_config, wait_for};

struct NoFederation;

#[async_trait]
impl Forwarder for NoFederation {
    async fn forward(&self, _message: &DataMessage, server: &str) -> Result<(), ForwardError> {
        panic!("unexpected forward to {}", server);
    }
}

fn self_signed_server() -> rustls::ServerConfig {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = generated.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(generated.key_pair.serialize_der().into());
    tls::server_config(vec![cert], key).unwrap()
}

async fn start_quic_relay() -> (Relay, String) {
    let listener = QuicListener::bind(
        "127.0.0.1:0".parse().unwrap(),
        self_signed_server(),
        QuicTimers::default(),
    )
    .unwrap();
    let addr = format!("127.0.0.1:{}", listener.local_address().port());
    let relay = Relay::start(&test_config("S1"), listener, Arc::new(NoFederation));
    (relay, addr)
}

async fn quic_client(relay: &Relay, addr: &str, name: &str) -> RelayClient {
    let conn = quic_transport::connect(addr, tls::client_config(None).unwrap(), QuicTimers::default())
        .await
        .unwrap();
    let client = RelayClient::register(name, "S1", Arc::new(conn), 8)
        .await
        .unwrap();
    wait_for(|| relay.registry.lookup_by_client(name).is_ok()).await;
    client
}

/// Test: alice and bob exchange a message over QUIC
#[tokio::test]
async fn test_quic_end_to_end_delivery() {
    let (relay, addr) = start_quic_relay().await;

    let alice = quic_client(&relay, &addr, "alice").await;
    let bob = quic_client(&relay, &addr, "bob").await;
    let (mut inbox, _errors) = bob.receive(CancellationToken::new());

    alice
        .send_to("bob@S1".parse().unwrap(), "hi")
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .expect("bob should receive the message")
        .unwrap();
    assert_eq!(received.from.to_string(), "alice@S1");
    assert_eq!(received.data, "hi");

    relay.shutdown().await;
}

/// Test: closing a QUIC client evicts its registration
#[tokio::test]
async fn test_quic_disconnect_evicts_client() {
    let (relay, addr) = start_quic_relay().await;

    let alice = quic_client(&relay, &addr, "alice").await;
    assert_eq!(relay.registry.connected_count(), 1);

    alice.close();
    wait_for(|| relay.registry.lookup_by_client("alice").is_err()).await;
    assert_eq!(relay.registry.connected_count(), 0);

    relay.shutdown().await;
}
