// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Stream Ingestion
//!
//! Accepts client connections and, per connection, accepts streams until
//! the connection dies. Every stream carries exactly one envelope: a
//! registration binds the sender's identity to this connection, anything
//! else is queued for the router. A broken stream never affects its
//! siblings or the connection.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection_limit::ConnectionLimiter;
use crate::connection_registry::{ConnectionRegistry, RegisterOutcome};
use crate::envelope::Message;
use crate::metrics::RelayMetrics;
use crate::router::{Inbound, InboundQueue};
use crate::transport::{BiStream, ConnectionHandle, MuxListener, CLOSE_SERVER};

/// Everything a connection handler needs.
#[derive(Clone)]
pub struct IngestDeps {
    pub registry: Arc<ConnectionRegistry>,
    pub queue: InboundQueue,
    pub metrics: RelayMetrics,
    pub limiter: ConnectionLimiter,
    pub max_message_size: usize,
}

/// Accepts connections until `cancel` fires or the listener fails.
pub async fn serve<L>(listener: L, deps: IngestDeps, cancel: CancellationToken)
where
    L: MuxListener,
{
    info!(addr = %listener.local_address(), "Accepting client connections");
    loop {
        let conn = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Listener stopped accepting: {}", e);
                    break;
                }
            }
        };

        deps.metrics.connections_total.inc();
        let guard = match deps.limiter.try_acquire() {
            Some(guard) => guard,
            None => {
                warn!(
                    "Connection rejected: at max capacity ({}/{})",
                    deps.limiter.active_count(),
                    deps.limiter.max_connections()
                );
                deps.metrics.connection_errors.inc();
                conn.close(CLOSE_SERVER, "at capacity");
                continue;
            }
        };

        let deps = deps.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            let _guard = guard;
            handle_connection(conn, deps, cancel).await;
        });
    }
    info!("Stopped accepting client connections");
}

/// Runs the stream-accept loop of one connection.
///
/// On exit the connection's address is evicted from the registry and the
/// connection is closed. Stream handlers still running observe the
/// connection's scope as cancelled and do not register afterwards.
pub async fn handle_connection(conn: ConnectionHandle, deps: IngestDeps, cancel: CancellationToken) {
    // Random session label for logging.
    let session = uuid::Uuid::new_v4().to_string()[..8].to_string();
    let addr = conn.remote_address();
    let scope = cancel.child_token();

    deps.metrics.connections_active.inc();
    debug!("[{}] Connection accepted from {}", session, addr);

    loop {
        let stream = tokio::select! {
            _ = scope.cancelled() => {
                conn.close(CLOSE_SERVER, "shutting down");
                break;
            }
            accepted = conn.accept_stream() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("[{}] Connection ended: {}", session, e);
                    break;
                }
            }
        };

        deps.metrics.streams_accepted.inc();
        tokio::spawn(handle_stream(
            stream,
            conn.clone(),
            deps.clone(),
            scope.clone(),
            session.clone(),
        ));
    }

    scope.cancel();
    if let Some(client) = deps.registry.remove(&addr) {
        info!("[{}] Client {} disconnected", session, client);
    }
    deps.metrics.connections_active.dec();
    deps.metrics
        .registered_clients
        .set(deps.registry.connected_count() as i64);
}

/// Reads and dispatches the single envelope a stream carries.
async fn handle_stream(
    stream: BiStream,
    conn: ConnectionHandle,
    deps: IngestDeps,
    scope: CancellationToken,
    session: String,
) {
    let message = match stream.read_message(deps.max_message_size).await {
        Ok(message) => message,
        Err(e) if e.is_decode() => {
            deps.metrics.decode_errors.inc();
            warn!("[{}] Discarding stream: {}", session, e);
            return;
        }
        Err(e) => {
            debug!("[{}] Stream read failed: {}", session, e);
            return;
        }
    };

    match message {
        Message::Registration(registration) => {
            let identity = registration.identity();
            if identity.is_empty() {
                deps.metrics.decode_errors.inc();
                warn!("[{}] Registration without an identity", session);
                return;
            }

            // The connection may have ended while this stream was read.
            if scope.is_cancelled() {
                debug!("[{}] Registration arrived after disconnect", session);
                return;
            }
            let addr = conn.remote_address();
            let Some(outcome) = deps.registry.register_if_live(identity, addr, conn, &scope) else {
                debug!("[{}] Registration arrived after disconnect", session);
                return;
            };
            if outcome != RegisterOutcome::Refreshed {
                deps.metrics.registrations.inc();
            }
            deps.metrics
                .registered_clients
                .set(deps.registry.connected_count() as i64);
        }
        Message::Data(data) => {
            debug!("[{}] Queueing message for {}", session, data.to);
            if deps.queue.enqueue(Inbound::from_client(data)).await.is_err() {
                warn!("[{}] Router stopped, message lost", session);
                return;
            }
            deps.metrics.messages_received.inc();
            deps.metrics.queue_depth.set(deps.queue.depth() as i64);
        }
    }
}
