// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types for the relay.
//!
//! Every error here is local to a single unit of work (one stream, one
//! delivery, one forward). Only bootstrap failures reach the process.

use thiserror::Error;

/// Errors raised while reading or writing an [`Envelope`](crate::envelope::Envelope).
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The bytes are not a structurally valid envelope.
    #[error("malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),

    /// Well-formed envelope with an address outside `local@server`.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// A registration arrived where only data is accepted.
    #[error("unexpected {0:?} envelope")]
    UnexpectedKind(crate::envelope::EnvelopeKind),

    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// The stream carried more than the configured maximum.
    #[error("envelope exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// Reading from or writing to the stream failed.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvelopeError {
    /// True for errors caused by the peer's bytes rather than the stream.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            EnvelopeError::Decode(_)
                | EnvelopeError::InvalidAddress(_)
                | EnvelopeError::UnexpectedKind(_)
                | EnvelopeError::TooLarge { .. }
        )
    }
}

/// A client identity with no live registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("client not found: {client}")]
pub struct NotFound {
    pub client: String,
}

/// Failures of the multiplexed transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("accept failed: {0}")]
    Accept(String),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("write failed: {0}")]
    Write(#[from] EnvelopeError),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Failures of a single federation forward.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to encode envelope for forwarding: {0}")]
    Encode(#[from] EnvelopeError),

    #[error("request to peer failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("peer rejected envelope with status {0}")]
    Status(u16),
}

/// Umbrella error for bootstrap and the client API.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
