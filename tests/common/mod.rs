// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for relay integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use chat_relay::config::RelayConfig;
use chat_relay::federation::{Forwarder, HttpForwarder, TASKS_PATH};
use chat_relay::http::create_router;
use chat_relay::memory_transport::{MemoryConnector, MemoryListener};
use chat_relay::{Relay, RelayClient};

/// Relay configuration for tests: small queue, everything else default.
#[allow(dead_code)]
pub fn test_config(server_name: &str) -> RelayConfig {
    RelayConfig {
        server_name: server_name.to_string(),
        buffer_size: 8,
        ..RelayConfig::default()
    }
}

/// Starts a relay on the in-memory transport.
#[allow(dead_code)]
pub fn start_memory_relay(server_name: &str, forwarder: Arc<dyn Forwarder>) -> (Relay, MemoryConnector) {
    let (listener, connector) = MemoryListener::bind();
    let relay = Relay::start(&test_config(server_name), listener, forwarder);
    (relay, connector)
}

/// Starts a relay with an [`HttpForwarder`] using `peers`.
#[allow(dead_code)]
pub fn start_federated_relay(
    server_name: &str,
    peers: HashMap<String, String>,
) -> (Relay, MemoryConnector) {
    start_memory_relay(server_name, Arc::new(HttpForwarder::new(peers)))
}

/// Serves `relay`'s HTTP endpoints on an ephemeral loopback port.
/// Returns the base URL.
#[allow(dead_code)]
pub async fn serve_http(relay: &Relay) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test HTTP listener");
    let addr = listener.local_addr().expect("Listener has no address");
    let app = create_router(relay.http_state());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

/// Connects a client and waits until the relay resolves its name.
#[allow(dead_code)]
pub async fn connect_client(
    relay: &Relay,
    connector: &MemoryConnector,
    name: &str,
) -> RelayClient {
    let conn = connector.connect().await.expect("Failed to connect");
    let client = RelayClient::register(name, &relay.server_name, conn, 8)
        .await
        .expect("Failed to register");
    wait_for(|| relay.registry.lookup_by_client(name).is_ok()).await;
    client
}

/// Polls `check` until it holds, panicking after two seconds.
#[allow(dead_code)]
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Condition not reached within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A peer relay stand-in that records every task body it is sent.
#[allow(dead_code)]
pub struct CapturingPeer {
    pub url: String,
    pub bodies: mpsc::UnboundedReceiver<Vec<u8>>,
}

async fn capture_task(
    State(tx): State<mpsc::UnboundedSender<Vec<u8>>>,
    body: Bytes,
) -> StatusCode {
    let _ = tx.send(body.to_vec());
    StatusCode::NO_CONTENT
}

/// Starts a [`CapturingPeer`] on an ephemeral loopback port.
#[allow(dead_code)]
pub async fn start_capturing_peer() -> CapturingPeer {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route(TASKS_PATH, post(capture_task))
        .with_state(tx);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind capturing peer");
    let addr = listener.local_addr().expect("Listener has no address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    CapturingPeer {
        url: format!("http://{}", addr),
        bodies: rx,
    }
}
