// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Registry
//!
//! Tracks which client identity is reachable on which live connection so
//! the router can deliver locally.
//!
//! The registry ties together three facts: the client name, the network
//! address of its connection and the connection handle. At most one address
//! is registered per name and at most one name per address. Both maps live
//! behind a single lock, so every operation observes and leaves a consistent
//! state; callers never see the lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::NotFound;
use crate::transport::{ConnectionHandle, CLOSE_SUPERSEDED};

/// What a call to [`ConnectionRegistry::register`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The name was not registered before.
    New,
    /// The name was already registered on this same address.
    Refreshed,
    /// The name moved from `previous` to the new address; the old
    /// connection was closed.
    Moved { previous: SocketAddr },
}

struct AddressEntry {
    client: String,
    conn: ConnectionHandle,
}

#[derive(Default)]
struct RegistryState {
    /// client name -> address
    addresses: HashMap<String, SocketAddr>,
    /// address -> client name and connection
    entries: HashMap<SocketAddr, AddressEntry>,
}

impl RegistryState {
    /// Installs the mapping. Returns the evicted connection, if any, for
    /// the caller to close once the lock is released.
    fn install(
        &mut self,
        client: &str,
        addr: SocketAddr,
        conn: ConnectionHandle,
    ) -> (RegisterOutcome, Option<ConnectionHandle>) {
        let previous = self.addresses.insert(client.to_string(), addr);
        let mut evicted = None;
        let outcome = match previous {
            None => RegisterOutcome::New,
            Some(prev) if prev == addr => RegisterOutcome::Refreshed,
            Some(prev) => {
                evicted = self.entries.remove(&prev).map(|entry| entry.conn);
                RegisterOutcome::Moved { previous: prev }
            }
        };

        let displaced = self.entries.insert(
            addr,
            AddressEntry {
                client: client.to_string(),
                conn,
            },
        );
        if let Some(old) = displaced {
            if old.client != client {
                // Last identity announced on an address wins.
                self.addresses.remove(&old.client);
                debug!(conn_ip = %addr, "Replaced identity registered on address");
            }
        }

        (outcome, evicted)
    }
}

/// Thread-safe registry of locally connected clients.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        ConnectionRegistry {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Binds `client` to the connection at `addr`.
    ///
    /// If `client` was registered on another address, that address is
    /// evicted in both directions and its connection closed. If `addr`
    /// carried another identity, that identity stops resolving.
    pub fn register(&self, client: &str, addr: SocketAddr, conn: ConnectionHandle) -> RegisterOutcome {
        let (outcome, evicted) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.install(client, addr, conn)
        };
        self.finish_register(client, addr, outcome, evicted)
    }

    /// Like [`register`](Self::register), but only while `scope` is live.
    ///
    /// `scope` is checked under the registry lock. A connection's cleanup
    /// cancels its scope before calling [`remove`](Self::remove), so a
    /// registration either lands before that removal or not at all, and a
    /// stale registration never evicts a live session. Returns `None` when
    /// nothing was installed.
    pub fn register_if_live(
        &self,
        client: &str,
        addr: SocketAddr,
        conn: ConnectionHandle,
        scope: &CancellationToken,
    ) -> Option<RegisterOutcome> {
        let (outcome, evicted) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if scope.is_cancelled() {
                return None;
            }
            state.install(client, addr, conn)
        };
        Some(self.finish_register(client, addr, outcome, evicted))
    }

    fn finish_register(
        &self,
        client: &str,
        addr: SocketAddr,
        outcome: RegisterOutcome,
        evicted: Option<ConnectionHandle>,
    ) -> RegisterOutcome {
        // Closing may wake the old connection's accept loop; do it unlocked.
        if let Some(old_conn) = evicted {
            old_conn.close(CLOSE_SUPERSEDED, "superseded");
        }

        match &outcome {
            RegisterOutcome::New => info!(client = %client, conn_ip = %addr, "Client registered"),
            RegisterOutcome::Refreshed => {
                debug!(client = %client, conn_ip = %addr, "Client re-registered on same connection")
            }
            RegisterOutcome::Moved { previous } => info!(
                client = %client,
                conn_ip = %addr,
                previous_ip = %previous,
                "Client moved to a new connection, old connection evicted"
            ),
        }
        outcome
    }

    /// Resolves a client name to its live connection.
    pub fn lookup_by_client(&self, client: &str) -> Result<ConnectionHandle, NotFound> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .addresses
            .get(client)
            .and_then(|addr| state.entries.get(addr))
            .map(|entry| entry.conn.clone())
            .ok_or_else(|| NotFound {
                client: client.to_string(),
            })
    }

    /// Resolves an address to the client registered on it.
    pub fn lookup_by_address(&self, addr: &SocketAddr) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.entries.get(addr).map(|entry| entry.client.clone())
    }

    /// Evicts every mapping rooted at `addr`. Returns the client that was
    /// registered there, if any.
    pub fn remove(&self, addr: &SocketAddr) -> Option<String> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let entry = state.entries.remove(addr)?;
        if state.addresses.get(&entry.client) == Some(addr) {
            state.addresses.remove(&entry.client);
        }
        Some(entry.client)
    }

    /// Returns the number of currently registered clients.
    pub fn connected_count(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.addresses.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
