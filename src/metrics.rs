//! Prometheus Metrics for the Relay
//!
//! Provides observability metrics for monitoring the relay server.

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Relay server metrics.
#[derive(Clone)]
pub struct RelayMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total QUIC connections accepted.
    pub connections_total: IntCounter,
    /// Current active QUIC connections.
    pub connections_active: IntGauge,
    /// Connections refused or failed.
    pub connection_errors: IntCounter,
    /// Streams accepted across all connections.
    pub streams_accepted: IntCounter,

    // Registry metrics
    /// Registration envelopes processed.
    pub registrations: IntCounter,
    /// Clients currently resolvable.
    pub registered_clients: IntGauge,

    // Message metrics
    /// Data envelopes enqueued for routing (client streams and federation).
    pub messages_received: IntCounter,
    /// Envelopes written to a local client.
    pub messages_delivered: IntCounter,
    /// Envelopes handed to a peer server.
    pub messages_forwarded: IntCounter,
    /// Envelopes dropped because the recipient is not connected.
    pub messages_dropped: IntCounter,
    /// Streams whose envelope failed to decode.
    pub decode_errors: IntCounter,
    /// Local sends that failed on the transport.
    pub send_errors: IntCounter,
    /// Federation forwards that failed.
    pub forward_errors: IntCounter,
    /// Envelopes waiting in the inbound queue.
    pub queue_depth: IntGauge,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
}

fn gauge(name: &str, help: &str) -> prometheus::Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
}

impl RelayMetrics {
    /// Creates a new metrics instance with all counters registered.
    pub fn new() -> Self {
        Self::try_new().expect("metric definitions are static and unique")
    }

    fn try_new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let metrics = RelayMetrics {
            connections_total: counter(
                "relay_connections_total",
                "Total QUIC connections accepted",
            )?,
            connections_active: gauge(
                "relay_connections_active",
                "Current active QUIC connections",
            )?,
            connection_errors: counter(
                "relay_connection_errors_total",
                "Total connection errors",
            )?,
            streams_accepted: counter(
                "relay_streams_accepted_total",
                "Total streams accepted",
            )?,
            registrations: counter(
                "relay_registrations_total",
                "Total client registrations processed",
            )?,
            registered_clients: gauge(
                "relay_registered_clients",
                "Clients currently registered",
            )?,
            messages_received: counter(
                "relay_messages_received_total",
                "Total data messages enqueued for routing",
            )?,
            messages_delivered: counter(
                "relay_messages_delivered_total",
                "Total messages delivered to local clients",
            )?,
            messages_forwarded: counter(
                "relay_messages_forwarded_total",
                "Total messages forwarded to peer servers",
            )?,
            messages_dropped: counter(
                "relay_messages_dropped_total",
                "Total messages dropped for unknown recipients",
            )?,
            decode_errors: counter(
                "relay_decode_errors_total",
                "Total envelopes that failed to decode",
            )?,
            send_errors: counter(
                "relay_send_errors_total",
                "Total failed local sends",
            )?,
            forward_errors: counter(
                "relay_forward_errors_total",
                "Total failed federation forwards",
            )?,
            queue_depth: gauge(
                "relay_queue_depth",
                "Messages waiting in the inbound queue",
            )?,
            registry: Arc::new(registry),
        };

        metrics.registry.register(Box::new(metrics.connections_total.clone()))?;
        metrics.registry.register(Box::new(metrics.connections_active.clone()))?;
        metrics.registry.register(Box::new(metrics.connection_errors.clone()))?;
        metrics.registry.register(Box::new(metrics.streams_accepted.clone()))?;
        metrics.registry.register(Box::new(metrics.registrations.clone()))?;
        metrics.registry.register(Box::new(metrics.registered_clients.clone()))?;
        metrics.registry.register(Box::new(metrics.messages_received.clone()))?;
        metrics.registry.register(Box::new(metrics.messages_delivered.clone()))?;
        metrics.registry.register(Box::new(metrics.messages_forwarded.clone()))?;
        metrics.registry.register(Box::new(metrics.messages_dropped.clone()))?;
        metrics.registry.register(Box::new(metrics.decode_errors.clone()))?;
        metrics.registry.register(Box::new(metrics.send_errors.clone()))?;
        metrics.registry.register(Box::new(metrics.forward_errors.clone()))?;
        metrics.registry.register(Box::new(metrics.queue_depth.clone()))?;

        Ok(metrics)
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
