//! Relay and Client Configuration
//!
//! Configuration loaded from environment variables.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RelayError;
use crate::quic_transport::QuicTimers;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Identity of this server in `client@server` addresses.
    pub server_name: String,
    /// QUIC listen address for client connections.
    pub quic_addr: SocketAddr,
    /// HTTP listen address for federation and diagnostics.
    pub http_addr: SocketAddr,
    /// Capacity of the inbound message queue.
    pub buffer_size: usize,
    /// PEM certificate chain.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
    /// QUIC keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// QUIC idle timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
    /// Maximum envelope size in bytes.
    pub max_message_size: usize,
    /// Peer server name -> base URL, overriding `http://<name>`.
    pub federation_peers: HashMap<String, String>,
    /// Bearer token required by `/metrics`, if set.
    pub metrics_token: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            server_name: String::new(),
            quic_addr: SocketAddr::from(([0, 0, 0, 0], 4242)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 9080)),
            buffer_size: 16,
            cert_path: PathBuf::from("server.crt"),
            key_path: PathBuf::from("server.key"),
            keep_alive_secs: 10,
            idle_timeout_secs: 30,
            max_connections: 1000,
            max_message_size: 1_048_576, // 1 MB
            federation_peers: HashMap::new(),
            metrics_token: None,
        }
    }
}

/// Parses `name=url,name=url`. Malformed items are skipped.
pub fn parse_peer_list(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|item| {
            let (name, url) = item.split_once('=')?;
            let (name, url) = (name.trim(), url.trim());
            if name.is_empty() || url.is_empty() {
                return None;
            }
            Some((name.to_string(), url.trim_end_matches('/').to_string()))
        })
        .collect()
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("RELAY_SERVER_NAME") {
            config.server_name = name.trim().to_string();
        }

        if let Ok(addr) = std::env::var("RELAY_QUIC_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.quic_addr = parsed;
            }
        }

        if let Ok(addr) = std::env::var("RELAY_HTTP_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.http_addr = parsed;
            }
        }

        if let Ok(val) = std::env::var("RELAY_BUFFER_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.buffer_size = parsed;
            }
        }

        if let Ok(val) = std::env::var("RELAY_CERT_PATH") {
            config.cert_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("RELAY_KEY_PATH") {
            config.key_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("RELAY_KEEP_ALIVE_SECS") {
            if let Ok(parsed) = val.parse() {
                config.keep_alive_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("RELAY_IDLE_TIMEOUT_SECS") {
            if let Ok(parsed) = val.parse() {
                config.idle_timeout_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("RELAY_MAX_CONNECTIONS") {
            if let Ok(parsed) = val.parse() {
                config.max_connections = parsed;
            }
        }

        if let Ok(val) = std::env::var("RELAY_MAX_MESSAGE_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.max_message_size = parsed;
            }
        }

        if let Ok(val) = std::env::var("RELAY_FEDERATION_PEERS") {
            config.federation_peers = parse_peer_list(&val);
        }

        config.metrics_token = std::env::var("RELAY_METRICS_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        config
    }

    /// Rejects configurations the relay cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.server_name.is_empty() {
            return Err(RelayError::Config("server name is empty".to_string()));
        }
        if self.server_name.contains('@') {
            return Err(RelayError::Config(
                "server name must not contain '@'".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(RelayError::Config("buffer size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Returns the QUIC transport timers.
    pub fn quic_timers(&self) -> QuicTimers {
        QuicTimers {
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}

/// Interactive client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity announced at registration.
    pub name: String,
    /// `host:port` of the relay's QUIC listener.
    pub server_addr: String,
    /// Server identity used in addresses.
    pub server_name: String,
    /// Capacity of the receive channels.
    pub buffer_size: usize,
    /// CA bundle for verifying the relay. `None` disables verification.
    pub ca_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            name: String::new(),
            server_addr: "localhost:4242".to_string(),
            server_name: "localhost".to_string(),
            buffer_size: 16,
            ca_path: None,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("CLIENT_NAME") {
            config.name = name.trim().to_string();
        }

        if let Ok(addr) = std::env::var("CLIENT_SERVER_ADDR") {
            config.server_name = host_part(&addr).to_string();
            config.server_addr = addr;
        }

        if let Ok(name) = std::env::var("CLIENT_SERVER_NAME") {
            config.server_name = name;
        }

        if let Ok(val) = std::env::var("CLIENT_BUFFER_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.buffer_size = parsed;
            }
        }

        if let Ok(val) = std::env::var("CLIENT_CA_PATH") {
            config.ca_path = Some(PathBuf::from(val));
        }

        config
    }

    /// Rejects configurations the client cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.name.is_empty() {
            return Err(RelayError::Config("nickname is empty".to_string()));
        }
        if self.name.contains('@') {
            return Err(RelayError::Config("nickname must not contain '@'".to_string()));
        }
        if self.buffer_size == 0 {
            return Err(RelayError::Config("buffer size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Host portion of a `host:port` string.
fn host_part(addr: &str) -> &str {
    addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr)
}
