// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Routing and Delivery
//!
//! A single consumer drains the bounded inbound queue. For each envelope it
//! decides between local delivery (recipient's server is this server) and
//! federation (any other server), then dispatches the delivery as its own
//! task. Delivery is best-effort and at-most-once: failures are logged and
//! counted, never retried or requeued, and two envelopes dequeued in order
//! may complete in either order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection_registry::ConnectionRegistry;
use crate::envelope::{DataMessage, Message};
use crate::federation::Forwarder;
use crate::metrics::RelayMetrics;
use crate::transport;

/// Where an inbound envelope entered this relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A stream from a directly connected client.
    Client,
    /// A federation task from a peer server.
    Federation,
}

/// An envelope waiting to be routed.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub message: DataMessage,
    pub origin: Origin,
}

impl Inbound {
    pub fn from_client(message: DataMessage) -> Self {
        Inbound {
            message,
            origin: Origin::Client,
        }
    }

    pub fn federated(message: DataMessage) -> Self {
        Inbound {
            message,
            origin: Origin::Federation,
        }
    }
}

/// The queue was closed because the router stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("inbound queue closed")]
pub struct QueueClosed;

/// Producer side of the bounded inbound queue.
///
/// Cloned into every stream handler and the federation endpoint. A full
/// queue suspends the producer until the router drains an entry.
#[derive(Clone)]
pub struct InboundQueue {
    tx: mpsc::Sender<Inbound>,
}

impl InboundQueue {
    /// Creates a queue holding at most `capacity` envelopes.
    pub fn new(capacity: usize) -> (InboundQueue, mpsc::Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (InboundQueue { tx }, rx)
    }

    /// Enqueues, waiting while the queue is full.
    pub async fn enqueue(&self, inbound: Inbound) -> Result<(), QueueClosed> {
        self.tx.send(inbound).await.map_err(|_| QueueClosed)
    }

    /// Envelopes currently waiting.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// What the router did with one envelope.
#[derive(Debug)]
pub enum Dispatch {
    /// Sending to a locally registered client.
    Local(JoinHandle<()>),
    /// Forwarding to the named peer server.
    Remote {
        server: String,
        task: JoinHandle<()>,
    },
    /// Recipient is not connected here; the envelope was dropped.
    Dropped,
}

impl Dispatch {
    /// Waits for the spawned delivery, if any.
    pub async fn finished(self) {
        match self {
            Dispatch::Local(task) | Dispatch::Remote { task, .. } => {
                let _ = task.await;
            }
            Dispatch::Dropped => {}
        }
    }
}

/// The local-versus-remote routing engine.
pub struct Router {
    server_name: String,
    registry: Arc<ConnectionRegistry>,
    forwarder: Arc<dyn Forwarder>,
    metrics: RelayMetrics,
}

impl Router {
    pub fn new(
        server_name: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
        forwarder: Arc<dyn Forwarder>,
        metrics: RelayMetrics,
    ) -> Self {
        Router {
            server_name: server_name.into(),
            registry,
            forwarder,
            metrics,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Routes one envelope and spawns its delivery.
    pub fn route(&self, inbound: Inbound) -> Dispatch {
        let Inbound {
            mut message,
            origin,
        } = inbound;

        if message.to.server() != self.server_name {
            let server = message.to.server().to_string();
            let forwarder = self.forwarder.clone();
            let metrics = self.metrics.clone();
            let target = server.clone();
            let task = tokio::spawn(async move {
                match forwarder.forward(&message, &target).await {
                    Ok(()) => metrics.messages_forwarded.inc(),
                    Err(e) => {
                        metrics.forward_errors.inc();
                        warn!(server = %target, "Federation forward failed: {}", e);
                    }
                }
            });
            return Dispatch::Remote { server, task };
        }

        let conn = match self.registry.lookup_by_client(message.to.client()) {
            Ok(conn) => conn,
            Err(e) => {
                self.metrics.messages_dropped.inc();
                warn!(to = %message.to, "Dropping message: {}", e);
                return Dispatch::Dropped;
            }
        };

        if origin == Origin::Client {
            message.set_origin_server(&self.server_name);
        }

        let metrics = self.metrics.clone();
        let task = tokio::spawn(async move {
            let addr = conn.remote_address();
            match transport::send_message(conn.as_ref(), &Message::Data(message)).await {
                Ok(()) => {
                    metrics.messages_delivered.inc();
                    debug!(conn_ip = %addr, "Delivered message");
                }
                Err(e) => {
                    metrics.send_errors.inc();
                    warn!(conn_ip = %addr, "Local delivery failed: {}", e);
                }
            }
        });
        Dispatch::Local(task)
    }

    /// Drains `inbound` until `cancel` fires or every producer is gone.
    /// Deliveries still in flight are not awaited.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<Inbound>, cancel: CancellationToken) {
        info!(server_name = %self.server_name, "Router started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Router stopping");
                    break;
                }
                next = inbound.recv() => match next {
                    Some(item) => {
                        self.route(item);
                    }
                    None => {
                        info!("Inbound queue closed, router stopping");
                        break;
                    }
                }
            }
        }
    }
}
