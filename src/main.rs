// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Relay Server
//!
//! A relay for real-time chat between federated servers.
//! Provides:
//! - QUIC endpoint for client registration and message streams
//! - HTTP endpoint for server-to-server task submission
//! - HTTP endpoints for queue depth, health checks and Prometheus metrics

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use chat_relay::config::RelayConfig;
use chat_relay::federation::HttpForwarder;
use chat_relay::http::create_router;
use chat_relay::quic_transport::QuicListener;
use chat_relay::tls;
use chat_relay::Relay;

/// How long closing connections get to flush before the process exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_relay=info".parse().unwrap()),
        )
        .init();

    // Load configuration
    let config = RelayConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        error!("Set RELAY_SERVER_NAME to this relay's name, e.g. RELAY_SERVER_NAME=relay1.example");
        std::process::exit(1);
    }

    info!("Starting Chat Relay Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Server name: {}", config.server_name);
    info!("QUIC: {}", config.quic_addr);
    info!("HTTP (federation, metrics): {}", config.http_addr);
    info!("Inbound queue capacity: {}", config.buffer_size);
    info!(
        "Federation peers: {}",
        if config.federation_peers.is_empty() {
            "none configured, using http://<server name>".to_string()
        } else {
            config.federation_peers.keys().cloned().collect::<Vec<_>>().join(", ")
        }
    );

    let tls_config = match tls::load_server_config(&config.cert_path, &config.key_path) {
        Ok(tls_config) => tls_config,
        Err(e) => {
            error!("Failed to load TLS material: {}", e);
            std::process::exit(1);
        }
    };

    let listener = match QuicListener::bind(config.quic_addr, tls_config, config.quic_timers()) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to start QUIC listener: {}", e);
            std::process::exit(1);
        }
    };

    if config.metrics_token.is_some() {
        info!("Metrics endpoint protected with bearer token");
    } else if !config.http_addr.ip().is_loopback() {
        warn!("Metrics exposed on non-localhost without auth token");
        warn!("Consider setting RELAY_METRICS_TOKEN for production use");
    }

    let forwarder = Arc::new(HttpForwarder::new(config.federation_peers.clone()));
    let relay = Relay::start(&config, listener.clone(), forwarder);

    // Start HTTP server for federation and diagnostics
    let http_listener = match TcpListener::bind(config.http_addr).await {
        Ok(http_listener) => http_listener,
        Err(e) => {
            error!("Failed to bind HTTP listener: {}", e);
            std::process::exit(1);
        }
    };
    let http_router = create_router(relay.http_state());
    let http_cancel = relay.cancel.clone();
    let http_addr = config.http_addr;
    let http_task = tokio::spawn(async move {
        info!("HTTP server listening on {}", http_addr);
        let served = axum::serve(http_listener, http_router)
            .with_graceful_shutdown(async move { http_cancel.cancelled().await })
            .await;
        if let Err(e) = served {
            error!("HTTP server failed: {}", e);
        }
    });

    wait_for_shutdown_signal().await;

    relay.cancel.cancel();
    listener.close();
    let _ = http_task.await;
    relay.shutdown().await;
    if tokio::time::timeout(DRAIN_TIMEOUT, listener.wait_idle()).await.is_err() {
        warn!("Connections still open after {:?}, exiting anyway", DRAIN_TIMEOUT);
    }
    info!("Shutdown complete");
}

/// Resolves on Ctrl-C or SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received SIGINT, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received SIGINT, shutting down...");
    }
}
