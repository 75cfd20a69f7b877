// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Federated chat relay.
//!
//! Clients connect over QUIC and register a `name@server` identity. Each
//! message travels on its own stream and is either delivered to a client
//! connected to this relay or forwarded once, over HTTP, to the relay
//! named in the recipient's address.

pub mod client;
pub mod config;
pub mod connection_limit;
pub mod connection_registry;
pub mod envelope;
pub mod error;
pub mod federation;
pub mod http;
pub mod ingestion;
pub mod memory_transport;
pub mod metrics;
pub mod quic_transport;
pub mod relay;
pub mod router;
pub mod tls;
pub mod transport;

pub use client::RelayClient;
pub use envelope::{Address, DataMessage, Message};
pub use error::RelayError;
pub use relay::Relay;
