// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Assembly
//!
//! Wires the registry, inbound queue, router and ingestion loop together
//! under one cancellation token. The binary and the integration tests
//! start relays the same way, differing only in transport and forwarder.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RelayConfig;
use crate::connection_limit::ConnectionLimiter;
use crate::connection_registry::ConnectionRegistry;
use crate::federation::Forwarder;
use crate::http::HttpState;
use crate::ingestion::{self, IngestDeps};
use crate::metrics::RelayMetrics;
use crate::router::{InboundQueue, Router};
use crate::transport::MuxListener;

/// A running relay.
pub struct Relay {
    pub server_name: String,
    pub registry: Arc<ConnectionRegistry>,
    pub queue: InboundQueue,
    pub metrics: RelayMetrics,
    pub cancel: CancellationToken,
    router_task: JoinHandle<()>,
    ingest_task: JoinHandle<()>,
    start_time: Instant,
    max_message_size: usize,
    metrics_token: Option<String>,
}

impl Relay {
    /// Starts the router and the ingestion loop on `listener`.
    pub fn start<L>(config: &RelayConfig, listener: L, forwarder: Arc<dyn Forwarder>) -> Relay
    where
        L: MuxListener,
    {
        let metrics = RelayMetrics::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let (queue, inbound) = InboundQueue::new(config.buffer_size);
        let cancel = CancellationToken::new();

        let router = Arc::new(Router::new(
            config.server_name.clone(),
            registry.clone(),
            forwarder,
            metrics.clone(),
        ));
        let router_task = tokio::spawn(router.run(inbound, cancel.clone()));

        let deps = IngestDeps {
            registry: registry.clone(),
            queue: queue.clone(),
            metrics: metrics.clone(),
            limiter: ConnectionLimiter::new(config.max_connections),
            max_message_size: config.max_message_size,
        };
        let ingest_task = tokio::spawn(ingestion::serve(listener, deps, cancel.clone()));

        info!(
            server_name = %config.server_name,
            buffer_size = config.buffer_size,
            "Relay started"
        );

        Relay {
            server_name: config.server_name.clone(),
            registry,
            queue,
            metrics,
            cancel,
            router_task,
            ingest_task,
            start_time: Instant::now(),
            max_message_size: config.max_message_size,
            metrics_token: config.metrics_token.clone(),
        }
    }

    /// State for the federation and diagnostics HTTP server.
    pub fn http_state(&self) -> HttpState {
        HttpState {
            metrics: self.metrics.clone(),
            metrics_token: self.metrics_token.clone(),
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            server_name: self.server_name.clone(),
            start_time: self.start_time,
            max_message_size: self.max_message_size,
        }
    }

    /// Cancels the relay and waits for the accept loop and router to exit.
    /// Deliveries already dispatched are not awaited.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.ingest_task.await;
        let _ = self.router_task.await;
        info!(server_name = %self.server_name, "Relay stopped");
    }
}
