// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Federation Forwarder
//!
//! Hands an envelope to the server hosting its recipient with a single
//! `POST /v1/tasks`. There is no retry and no acknowledgement beyond the
//! HTTP status: a failed forward is reported to the caller, which logs it,
//! and the message is lost.
//!
//! Exactly one hop is assumed. The receiving server routes the envelope
//! as if it were local and never forwards it again on its own initiative.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::envelope::DataMessage;
use crate::error::ForwardError;

/// Path of the task-submission endpoint on every relay.
pub const TASKS_PATH: &str = "/v1/tasks";

/// Sends envelopes to peer servers.
#[async_trait]
pub trait Forwarder: Send + Sync + 'static {
    /// Submits `message` to `server`'s task endpoint once.
    async fn forward(&self, message: &DataMessage, server: &str) -> Result<(), ForwardError>;
}

/// Forwarder speaking HTTP to peer relays.
pub struct HttpForwarder {
    client: reqwest::Client,
    peers: HashMap<String, String>,
}

impl HttpForwarder {
    /// `peers` maps server names to base URLs; unknown servers are reached
    /// at `http://<server name>`.
    pub fn new(peers: HashMap<String, String>) -> Self {
        HttpForwarder {
            client: reqwest::Client::new(),
            peers,
        }
    }

    /// URL of `server`'s task endpoint.
    pub fn task_url(&self, server: &str) -> String {
        match self.peers.get(server) {
            Some(base) => format!("{}{}", base, TASKS_PATH),
            None => format!("http://{}{}", server, TASKS_PATH),
        }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, message: &DataMessage, server: &str) -> Result<(), ForwardError> {
        let body = message.encode()?;
        let url = self.task_url(server);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status(status.as_u16()));
        }
        debug!(server = %server, "Envelope accepted by peer");
        Ok(())
    }
}
