// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Envelope Wire Format
//!
//! One JSON envelope per stream: the writer sends a single object and
//! finishes its side, the reader consumes the stream to its end. The same
//! bytes are the body of a federation `POST /v1/tasks`.
//!
//! The `kind` discriminator is decoded once into [`Message`], so the rest of
//! the relay matches on variants instead of comparing strings. Data messages
//! carry their `from`/`to` already split into [`Address`] halves; a failed
//! decode never yields a partially split message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::EnvelopeError;

/// Protocol version stamped on envelopes created by this crate.
pub const PROTOCOL_VERSION: &str = "relay.chat/v1alpha1";

/// Local part used for the server side of a registration (`SERVER@<server>`).
pub const SERVER_LOCALPART: &str = "SERVER";

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    #[serde(rename = "data", alias = "Data")]
    Data,
    #[serde(rename = "client-registration", alias = "ClientRegistration")]
    ClientRegistration,
}

/// The envelope exactly as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub version: String,
    pub kind: EnvelopeKind,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: String,
}

/// A `localpart@server` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    client: String,
    server: String,
}

impl Address {
    /// Builds an address from its halves. Both must be non-empty and free of `@`.
    pub fn new(client: impl Into<String>, server: impl Into<String>) -> Result<Self, EnvelopeError> {
        let client = client.into();
        let server = server.into();
        if client.is_empty() || server.is_empty() || client.contains('@') || server.contains('@') {
            return Err(EnvelopeError::InvalidAddress(format!("{}@{}", client, server)));
        }
        Ok(Address { client, server })
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

impl FromStr for Address {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(client), Some(server), None) if !client.is_empty() && !server.is_empty() => {
                Ok(Address {
                    client: client.to_string(),
                    server: server.to_string(),
                })
            }
            _ => Err(EnvelopeError::InvalidAddress(s.to_string())),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.client, self.server)
    }
}

/// A client announcing its identity on a fresh connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub version: String,
    pub from: String,
    pub to: String,
    pub id: Option<String>,
}

impl Registration {
    /// Creates the registration a client sends right after dialing `server`.
    pub fn announce(identity: &str, server: &str) -> Self {
        Registration {
            version: PROTOCOL_VERSION.to_string(),
            from: format!("{}@{}", identity, server),
            to: format!("{}@{}", SERVER_LOCALPART, server),
            id: None,
        }
    }

    /// The claimed identity: the local part of `from`, or all of it when
    /// there is no `@`.
    pub fn identity(&self) -> &str {
        match self.from.split_once('@') {
            Some((local, _)) => local,
            None => &self.from,
        }
    }
}

/// An addressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub version: String,
    pub from: Address,
    pub to: Address,
    pub id: Option<String>,
    pub data: String,
}

impl DataMessage {
    pub fn new(from: Address, to: Address, data: impl Into<String>) -> Self {
        DataMessage {
            version: PROTOCOL_VERSION.to_string(),
            from,
            to,
            id: None,
            data: data.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Presents `server` as the sender's server, keeping the sender's local part.
    pub fn set_origin_server(&mut self, server: &str) {
        self.from.server = server.to_string();
    }
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Registration(Registration),
    Data(DataMessage),
}

impl TryFrom<Envelope> for Message {
    type Error = EnvelopeError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        match envelope.kind {
            EnvelopeKind::ClientRegistration => Ok(Message::Registration(Registration {
                version: envelope.version,
                from: envelope.from,
                to: envelope.to,
                id: envelope.id,
            })),
            EnvelopeKind::Data => {
                let from = envelope.from.parse()?;
                let to = envelope.to.parse()?;
                Ok(Message::Data(DataMessage {
                    version: envelope.version,
                    from,
                    to,
                    id: envelope.id,
                    data: envelope.data,
                }))
            }
        }
    }
}

impl From<&Message> for Envelope {
    fn from(message: &Message) -> Self {
        match message {
            Message::Registration(reg) => Envelope {
                version: reg.version.clone(),
                kind: EnvelopeKind::ClientRegistration,
                from: reg.from.clone(),
                to: reg.to.clone(),
                id: reg.id.clone(),
                data: String::new(),
            },
            Message::Data(data) => Envelope::from(data),
        }
    }
}

impl From<&DataMessage> for Envelope {
    fn from(message: &DataMessage) -> Self {
        Envelope {
            version: message.version.clone(),
            kind: EnvelopeKind::Data,
            from: message.from.to_string(),
            to: message.to.to_string(),
            id: message.id.clone(),
            data: message.data.clone(),
        }
    }
}

impl Message {
    /// Decodes and validates one envelope from a complete buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(EnvelopeError::Decode)?;
        Message::try_from(envelope)
    }

    /// Reads a stream to its end (at most `limit` bytes) and decodes it.
    pub async fn read_from<R>(reader: R, limit: usize) -> Result<Self, EnvelopeError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::new();
        reader
            .take((limit as u64).saturating_add(1))
            .read_to_end(&mut buf)
            .await?;
        if buf.len() > limit {
            return Err(EnvelopeError::TooLarge { limit });
        }
        Message::decode(&buf)
    }

    /// Wire bytes for this message.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        encode_envelope(&Envelope::from(self))
    }

    /// Unwraps a data message; registrations are rejected.
    pub fn into_data(self) -> Result<DataMessage, EnvelopeError> {
        match self {
            Message::Data(data) => Ok(data),
            Message::Registration(_) => Err(EnvelopeError::UnexpectedKind(
                EnvelopeKind::ClientRegistration,
            )),
        }
    }
}

/// Serializes an envelope followed by a newline.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
    let mut bytes = serde_json::to_vec(envelope).map_err(EnvelopeError::Encode)?;
    bytes.push(b'\n');
    Ok(bytes)
}

impl DataMessage {
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        encode_envelope(&Envelope::from(self))
    }
}

/// Writes `message` and shuts down the writer so the peer sees end-of-stream.
pub async fn write_message<W>(mut writer: W, message: &Message) -> Result<(), EnvelopeError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.encode()?;
    writer.write_all(&bytes).await?;
    writer.shutdown().await?;
    Ok(())
}
