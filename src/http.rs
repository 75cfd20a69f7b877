//! HTTP Server for Federation and Diagnostics
//!
//! Peer relays submit envelopes through `POST /v1/tasks`. The remaining
//! endpoints are read-only: queue depth, health and Prometheus metrics.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, warn};

use crate::connection_registry::ConnectionRegistry;
use crate::envelope::Message;
use crate::federation::TASKS_PATH;
use crate::metrics::RelayMetrics;
use crate::router::{Inbound, InboundQueue};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub metrics: RelayMetrics,
    pub metrics_token: Option<String>,
    pub queue: InboundQueue,
    pub registry: Arc<ConnectionRegistry>,
    pub server_name: String,
    pub start_time: Instant,
    pub max_message_size: usize,
}

/// Middleware to check bearer token for metrics endpoint.
async fn metrics_auth_middleware(
    State(state): State<HttpState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    // Only check auth for /metrics endpoint
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let is_authorized = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .is_some_and(|token| token == expected_token);

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the HTTP router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route(TASKS_PATH, post(task_handler))
        .route("/v1/queue", get(queue_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(root_handler))
        .layer(DefaultBodyLimit::max(state.max_message_size))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

/// Accepts one envelope from a peer relay and queues it for routing.
///
/// Responds once the envelope is queued, which may wait for the router
/// to drain a full queue.
async fn task_handler(State(state): State<HttpState>, body: Bytes) -> StatusCode {
    let message = match Message::decode(&body).and_then(Message::into_data) {
        Ok(message) => message,
        Err(e) => {
            state.metrics.decode_errors.inc();
            warn!("Rejected federation task: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    debug!(from = %message.from, to = %message.to, "Federation task received");
    if state.queue.enqueue(Inbound::federated(message)).await.is_err() {
        warn!("Router stopped, federation task refused");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    state.metrics.messages_received.inc();
    StatusCode::NO_CONTENT
}

/// Reports the inbound queue's fill level.
async fn queue_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "depth": state.queue.depth(),
        "capacity": state.queue.capacity(),
    }))
}

/// Health check - always returns 200 if the server is running.
async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "server_name": state.server_name,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "registered_clients": state.registry.connected_count(),
    }))
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    // Gauges that are cheaper to read at scrape time than to track.
    state.metrics.queue_depth.set(state.queue.depth() as i64);
    state
        .metrics
        .registered_clients
        .set(state.registry.connected_count() as i64);

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

/// Root handler - returns basic info.
async fn root_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "chat-relay",
        "server_name": state.server_name,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [TASKS_PATH, "/v1/queue", "/health", "/metrics"]
    }))
}
