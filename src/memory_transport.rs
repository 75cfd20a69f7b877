// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-process implementation of the transport boundary.
//!
//! Streams are tokio duplex pipes; each connection gets a unique loopback
//! address so the registry sees distinct network addresses per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transport::{BiStream, ConnectionHandle, MuxConnection, MuxListener};

const PIPE_CAPACITY: usize = 64 * 1024;
const ACCEPT_BACKLOG: usize = 64;

static NEXT_PORT: AtomicU16 = AtomicU16::new(20_000);

fn next_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], NEXT_PORT.fetch_add(1, Ordering::Relaxed)))
}

/// One end of an in-process connection.
pub struct MemoryConnection {
    local: SocketAddr,
    remote: SocketAddr,
    to_peer: mpsc::Sender<BiStream>,
    incoming: Mutex<mpsc::Receiver<BiStream>>,
    closed: CancellationToken,
}

impl MemoryConnection {
    /// Creates both ends of a connection.
    pub fn pair() -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
        let (a_addr, b_addr) = (next_address(), next_address());
        let (to_a, a_incoming) = mpsc::channel(ACCEPT_BACKLOG);
        let (to_b, b_incoming) = mpsc::channel(ACCEPT_BACKLOG);
        let closed = CancellationToken::new();

        let a = Arc::new(MemoryConnection {
            local: a_addr,
            remote: b_addr,
            to_peer: to_b,
            incoming: Mutex::new(a_incoming),
            closed: closed.clone(),
        });
        let b = Arc::new(MemoryConnection {
            local: b_addr,
            remote: a_addr,
            to_peer: to_a,
            incoming: Mutex::new(b_incoming),
            closed,
        });
        (a, b)
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

fn pipe_ends() -> (BiStream, BiStream) {
    let (left, right) = tokio::io::duplex(PIPE_CAPACITY);
    let (left_recv, left_send) = tokio::io::split(left);
    let (right_recv, right_send) = tokio::io::split(right);
    (
        BiStream {
            send: Box::new(left_send),
            recv: Box::new(left_recv),
        },
        BiStream {
            send: Box::new(right_send),
            recv: Box::new(right_recv),
        },
    )
}

#[async_trait]
impl MuxConnection for MemoryConnection {
    async fn open_stream(&self) -> Result<BiStream, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed("connection closed".to_string()));
        }
        let (ours, theirs) = pipe_ends();
        self.to_peer
            .send(theirs)
            .await
            .map_err(|_| TransportError::Closed("peer went away".to_string()))?;
        Ok(ours)
    }

    async fn accept_stream(&self) -> Result<BiStream, TransportError> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed("connection closed".to_string())),
            stream = incoming.recv() => {
                stream.ok_or_else(|| TransportError::Closed("peer went away".to_string()))
            }
        }
    }

    fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    fn close(&self, _code: u32, _reason: &str) {
        self.closed.cancel();
    }
}

/// Accepts connections made through the matching [`MemoryConnector`].
pub struct MemoryListener {
    address: SocketAddr,
    incoming: Mutex<mpsc::Receiver<ConnectionHandle>>,
}

/// Dials a [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryConnector {
    to_listener: mpsc::Sender<ConnectionHandle>,
}

impl MemoryListener {
    pub fn bind() -> (MemoryListener, MemoryConnector) {
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        (
            MemoryListener {
                address: next_address(),
                incoming: Mutex::new(rx),
            },
            MemoryConnector { to_listener: tx },
        )
    }
}

impl MemoryConnector {
    /// Connects and returns the client end.
    pub async fn connect(&self) -> Result<Arc<MemoryConnection>, TransportError> {
        let (client, server) = MemoryConnection::pair();
        self.to_listener
            .send(server)
            .await
            .map_err(|_| TransportError::Connect("listener closed".to_string()))?;
        Ok(client)
    }
}

#[async_trait]
impl MuxListener for MemoryListener {
    async fn accept(&self) -> Result<ConnectionHandle, TransportError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::Accept("listener closed".to_string()))
    }

    fn local_address(&self) -> SocketAddr {
        self.address
    }
}
