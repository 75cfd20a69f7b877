// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Interactive Chat Client
//!
//! Registers with one relay, prints every message it receives and sends
//! one message per stdin line of the form `<name@server> <text>`.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chat_relay::config::ClientConfig;
use chat_relay::{Address, RelayClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_relay=info".parse().unwrap()),
        )
        .init();

    let config = ClientConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        error!("Set CLIENT_NAME to your nickname, e.g. CLIENT_NAME=alice");
        std::process::exit(1);
    }

    let client = match RelayClient::connect_quic(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to {}: {}", config.server_addr, e);
            std::process::exit(1);
        }
    };
    info!("Client started as {}", client.address());

    let cancel = CancellationToken::new();
    let (mut messages, mut errors) = client.receive(cancel.clone());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = messages.recv() => match received {
                    Some(message) => println!("{}: {}", message.from, message.data),
                    None => break,
                },
                failed = errors.recv() => match failed {
                    Some(e) => warn!("Error receiving message: {}", e),
                    None => break,
                },
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        };

        let Some((to, text)) = parse_line(&line) else {
            if !line.trim().is_empty() {
                warn!("Expected `<name@server> <text>`");
            }
            continue;
        };
        let to: Address = match to.parse() {
            Ok(to) => to,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        if let Err(e) = client.send_to(to, text).await {
            warn!("Failed to send: {}", e);
        }
    }

    cancel.cancel();
    client.close();
}

/// Splits `<to> <text>` at the first whitespace.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (to, text) = line.trim().split_once(char::is_whitespace)?;
    let text = text.trim_start();
    (!text.is_empty()).then_some((to, text))
}
