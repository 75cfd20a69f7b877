// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Client
//!
//! Holds exactly one connection to one relay. Registration is sent as soon
//! as the client is constructed; afterwards every outgoing message opens a
//! fresh stream and every incoming stream carries one message.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::envelope::{Address, DataMessage, Message, Registration};
use crate::error::{RelayError, TransportError};
use crate::quic_transport::{self, QuicTimers};
use crate::tls;
use crate::transport::{self, ConnectionHandle, CLOSE_SERVER};

/// Largest envelope the client accepts from the relay.
pub const MAX_ENVELOPE_SIZE: usize = 1_048_576;

/// A registered connection to a relay.
pub struct RelayClient {
    address: Address,
    conn: ConnectionHandle,
    buffer_size: usize,
}

impl RelayClient {
    /// Announces `name` on `conn` and returns the registered client.
    pub async fn register(
        name: &str,
        server_name: &str,
        conn: ConnectionHandle,
        buffer_size: usize,
    ) -> Result<Self, RelayError> {
        let address = Address::new(name, server_name)?;
        let registration = Registration::announce(address.client(), address.server());
        transport::send_message(conn.as_ref(), &Message::Registration(registration)).await?;
        debug!(client = %address, "Registration sent");

        Ok(RelayClient {
            address,
            conn,
            buffer_size: buffer_size.max(1),
        })
    }

    /// Dials the relay over QUIC and registers.
    pub async fn connect_quic(config: &ClientConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let tls = tls::client_config(config.ca_path.as_deref())?;
        let conn = quic_transport::connect(&config.server_addr, tls, QuicTimers::default()).await?;
        Self::register(
            &config.name,
            &config.server_name,
            Arc::new(conn),
            config.buffer_size,
        )
        .await
    }

    /// This client's own `name@server` address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Sends one message on a new stream.
    pub async fn send(&self, message: &DataMessage) -> Result<(), TransportError> {
        transport::send_message(self.conn.as_ref(), &Message::Data(message.clone())).await
    }

    /// Sends `data` to `to` from this client's address, with a fresh id.
    pub async fn send_to(&self, to: Address, data: impl Into<String>) -> Result<DataMessage, TransportError> {
        let message = DataMessage::new(self.address.clone(), to, data)
            .with_id(uuid::Uuid::new_v4().to_string());
        self.send(&message).await?;
        Ok(message)
    }

    /// Starts receiving.
    ///
    /// Messages and per-stream errors arrive on separate channels. A failed
    /// stream accept is reported once and ends the loop; both channels close
    /// when the loop and its readers are done.
    pub fn receive(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<DataMessage>, mpsc::Receiver<RelayError>) {
        let (msg_tx, msg_rx) = mpsc::channel(self.buffer_size);
        let (err_tx, err_rx) = mpsc::channel(self.buffer_size);
        let conn = self.conn.clone();

        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = conn.accept_stream() => match accepted {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = err_tx.send(e.into()).await;
                            break;
                        }
                    }
                };

                let msg_tx = msg_tx.clone();
                let err_tx = err_tx.clone();
                tokio::spawn(async move {
                    let received = stream
                        .read_message(MAX_ENVELOPE_SIZE)
                        .await
                        .and_then(Message::into_data);
                    match received {
                        Ok(message) => {
                            let _ = msg_tx.send(message).await;
                        }
                        Err(e) => {
                            warn!("Failed to read incoming message: {}", e);
                            let _ = err_tx.send(e.into()).await;
                        }
                    }
                });
            }
        });

        (msg_rx, err_rx)
    }

    /// Closes the connection.
    pub fn close(&self) {
        self.conn.close(CLOSE_SERVER, "client closing");
    }
}
