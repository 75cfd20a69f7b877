// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transport Boundary
//!
//! The relay only needs an encrypted, multiplexed, connection-oriented
//! transport: accept connections, open and accept bidirectional streams,
//! and report the peer's address. [`crate::quic_transport`] implements it
//! over QUIC; [`crate::memory_transport`] implements it in-process.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::envelope::{self, Message};
use crate::error::{EnvelopeError, TransportError};

/// Application close code used when a connection is evicted by a newer
/// registration of the same identity.
pub const CLOSE_SUPERSEDED: u32 = 1;
/// Application close code used when the relay refuses or ends a connection.
pub const CLOSE_SERVER: u32 = 2;

/// One bidirectional stream, split into its halves.
pub struct BiStream {
    pub send: Box<dyn AsyncWrite + Send + Unpin>,
    pub recv: Box<dyn AsyncRead + Send + Unpin>,
}

impl BiStream {
    /// Reads the single envelope carried by this stream.
    pub async fn read_message(self, limit: usize) -> Result<Message, EnvelopeError> {
        Message::read_from(self.recv, limit).await
    }

    /// Writes a single envelope and finishes the send side.
    pub async fn write_message(self, message: &Message) -> Result<(), EnvelopeError> {
        envelope::write_message(self.send, message).await
    }
}

/// A live multiplexed connection.
#[async_trait]
pub trait MuxConnection: Send + Sync + 'static {
    /// Opens a new outbound stream.
    async fn open_stream(&self) -> Result<BiStream, TransportError>;

    /// Waits for the peer to open a stream. Fails once the connection ends.
    async fn accept_stream(&self) -> Result<BiStream, TransportError>;

    /// The peer's network address.
    fn remote_address(&self) -> SocketAddr;

    /// Closes the connection with an application code and reason.
    fn close(&self, code: u32, reason: &str);
}

/// Shared, non-owning reference to a connection.
pub type ConnectionHandle = Arc<dyn MuxConnection>;

/// Source of incoming connections.
#[async_trait]
pub trait MuxListener: Send + Sync + 'static {
    /// Waits for the next established connection. Fails once the listener
    /// is closed.
    async fn accept(&self) -> Result<ConnectionHandle, TransportError>;

    /// Address the listener is bound to.
    fn local_address(&self) -> SocketAddr;
}

/// Opens a fresh stream on `conn`, writes `message` and finishes the stream.
pub async fn send_message(conn: &dyn MuxConnection, message: &Message) -> Result<(), TransportError> {
    let stream = conn.open_stream().await?;
    stream.write_message(message).await?;
    Ok(())
}
