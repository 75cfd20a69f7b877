// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! QUIC Transport
//!
//! quinn-backed implementation of [`MuxListener`] and [`MuxConnection`].
//! Each envelope travels on its own bidirectional stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Endpoint, IdleTimeout, TransportConfig, VarInt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::{BiStream, ConnectionHandle, MuxConnection, MuxListener};

/// Transport timers shared by server and client endpoints.
#[derive(Debug, Clone, Copy)]
pub struct QuicTimers {
    pub keep_alive: Duration,
    pub idle_timeout: Duration,
}

impl Default for QuicTimers {
    fn default() -> Self {
        QuicTimers {
            keep_alive: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

fn transport_config(timers: QuicTimers) -> Result<TransportConfig, TransportError> {
    let mut transport = TransportConfig::default();
    transport.keep_alive_interval(Some(timers.keep_alive));
    transport.max_idle_timeout(Some(
        IdleTimeout::try_from(timers.idle_timeout)
            .map_err(|e| TransportError::Tls(format!("Invalid idle timeout: {}", e)))?,
    ));
    Ok(transport)
}

/// A QUIC connection.
pub struct QuicConnection {
    connection: quinn::Connection,
    // Client-side connections keep their endpoint alive.
    _endpoint: Option<Endpoint>,
}

impl QuicConnection {
    pub fn new(connection: quinn::Connection) -> Self {
        QuicConnection {
            connection,
            _endpoint: None,
        }
    }
}

fn bi_stream(send: quinn::SendStream, recv: quinn::RecvStream) -> BiStream {
    BiStream {
        send: Box::new(send),
        recv: Box::new(recv),
    }
}

#[async_trait]
impl MuxConnection for QuicConnection {
    async fn open_stream(&self) -> Result<BiStream, TransportError> {
        let (send, recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))?;
        Ok(bi_stream(send, recv))
    }

    async fn accept_stream(&self) -> Result<BiStream, TransportError> {
        let (send, recv) = self
            .connection
            .accept_bi()
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))?;
        Ok(bi_stream(send, recv))
    }

    fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    fn close(&self, code: u32, reason: &str) {
        self.connection.close(VarInt::from_u32(code), reason.as_bytes());
    }
}

const HANDSHAKE_BACKLOG: usize = 64;

/// Server endpoint accepting QUIC connections. Clones share the endpoint
/// and its queue of established connections.
#[derive(Clone)]
pub struct QuicListener {
    endpoint: Endpoint,
    established: Arc<Mutex<mpsc::Receiver<quinn::Connection>>>,
}

impl QuicListener {
    /// Binds a server endpoint on `addr`.
    pub fn bind(
        addr: SocketAddr,
        tls: rustls::ServerConfig,
        timers: QuicTimers,
    ) -> Result<Self, TransportError> {
        let crypto = QuicServerConfig::try_from(Arc::new(tls))
            .map_err(|e| TransportError::Tls(format!("Invalid QUIC TLS config: {}", e)))?;
        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        server_config.transport_config(Arc::new(transport_config(timers)?));

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| TransportError::Accept(format!("Failed to bind {}: {}", addr, e)))?;
        let (tx, rx) = mpsc::channel(HANDSHAKE_BACKLOG);
        tokio::spawn(drive_handshakes(endpoint.clone(), tx));
        Ok(QuicListener {
            endpoint,
            established: Arc::new(Mutex::new(rx)),
        })
    }

    /// Stops accepting and closes every connection on the endpoint.
    pub fn close(&self) {
        self.endpoint
            .close(VarInt::from_u32(crate::transport::CLOSE_SERVER), b"shutting down");
    }

    /// Waits until every connection on the endpoint has been closed.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}

/// Runs every incoming handshake on its own task, so a slow or stalled
/// peer never holds up the ones behind it. Ends when the endpoint closes.
async fn drive_handshakes(endpoint: Endpoint, established: mpsc::Sender<quinn::Connection>) {
    while let Some(incoming) = endpoint.accept().await {
        let established = established.clone();
        tokio::spawn(async move {
            let remote = incoming.remote_address();
            match incoming.await {
                Ok(connection) => {
                    if established.send(connection).await.is_err() {
                        debug!(conn_ip = %remote, "Listener dropped, discarding connection");
                    }
                }
                // A failed handshake only concerns that peer.
                Err(e) => warn!(conn_ip = %remote, "QUIC handshake failed: {}", e),
            }
        });
    }
    debug!("QUIC endpoint closed, handshake driver stopping");
}

#[async_trait]
impl MuxListener for QuicListener {
    async fn accept(&self) -> Result<ConnectionHandle, TransportError> {
        let connection = self
            .established
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::Accept("endpoint closed".to_string()))?;
        Ok(Arc::new(QuicConnection::new(connection)))
    }

    fn local_address(&self) -> SocketAddr {
        self.endpoint
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
    }
}

/// Dials `server_addr` (a `host:port` string) and completes the handshake.
pub async fn connect(
    server_addr: &str,
    tls: rustls::ClientConfig,
    timers: QuicTimers,
) -> Result<QuicConnection, TransportError> {
    let remote = tokio::net::lookup_host(server_addr)
        .await
        .map_err(|e| TransportError::Connect(format!("Failed to resolve {}: {}", server_addr, e)))?
        .next()
        .ok_or_else(|| TransportError::Connect(format!("No address for {}", server_addr)))?;
    let server_name = server_addr
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(server_addr)
        .trim_start_matches('[')
        .trim_end_matches(']');

    let bind: SocketAddr = if remote.is_ipv6() {
        SocketAddr::from(([0u16; 8], 0))
    } else {
        SocketAddr::from(([0, 0, 0, 0], 0))
    };
    let mut endpoint = Endpoint::client(bind)
        .map_err(|e| TransportError::Connect(format!("Failed to bind client endpoint: {}", e)))?;

    let crypto = QuicClientConfig::try_from(Arc::new(tls))
        .map_err(|e| TransportError::Tls(format!("Invalid QUIC TLS config: {}", e)))?;
    let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));
    client_config.transport_config(Arc::new(transport_config(timers)?));
    endpoint.set_default_client_config(client_config);

    let connection = endpoint
        .connect(remote, server_name)
        .map_err(|e| TransportError::Connect(e.to_string()))?
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    debug!(conn_ip = %remote, "QUIC connection established");

    Ok(QuicConnection {
        connection,
        _endpoint: Some(endpoint),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{DataMessage, Message};
    use crate::tls;
    use crate::transport::send_message;
    use rustls::pki_types::PrivateKeyDer;

    fn self_signed_server() -> rustls::ServerConfig {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = generated.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(generated.key_pair.serialize_der().into());
        tls::server_config(vec![cert], key).unwrap()
    }

    #[tokio::test]
    async fn test_quic_stream_roundtrip() {
        let listener = QuicListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            self_signed_server(),
            QuicTimers::default(),
        )
        .unwrap();
        let addr = listener.local_address();

        let client = connect(
            &format!("127.0.0.1:{}", addr.port()),
            tls::client_config(None).unwrap(),
            QuicTimers::default(),
        )
        .await
        .unwrap();
        let server = listener.accept().await.unwrap();

        let message = Message::Data(DataMessage::new(
            "alice@S1".parse().unwrap(),
            "bob@S1".parse().unwrap(),
            "over quic",
        ));
        send_message(&client, &message).await.unwrap();

        let stream = server.accept_stream().await.unwrap();
        assert_eq!(stream.read_message(4096).await.unwrap(), message);

        client.close(0, "done");
        assert!(server.accept_stream().await.is_err());
    }

    /// Holds the server certificate check until released.
    #[derive(Debug)]
    struct HeldVerifier {
        release: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
        schemes: Vec<rustls::SignatureScheme>,
    }

    impl rustls::client::danger::ServerCertVerifier for HeldVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &rustls::pki_types::CertificateDer<'_>,
            _intermediates: &[rustls::pki_types::CertificateDer<'_>],
            _server_name: &rustls::pki_types::ServerName<'_>,
            _ocsp: &[u8],
            _now: rustls::pki_types::UnixTime,
        ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
            let _ = self
                .release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(10));
            Ok(rustls::client::danger::ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &rustls::pki_types::CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &rustls::pki_types::CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            self.schemes.clone()
        }
    }

    fn held_client_config(release: std::sync::mpsc::Receiver<()>) -> rustls::ClientConfig {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let schemes = provider.signature_verification_algorithms.supported_schemes();
        let mut config = rustls::ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
            .unwrap()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(HeldVerifier {
                release: std::sync::Mutex::new(release),
                schemes,
            }))
            .with_no_client_auth();
        config.alpn_protocols = vec![tls::ALPN_PROTOCOL.to_vec()];
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stalled_handshake_does_not_block_accept() {
        let listener = QuicListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            self_signed_server(),
            QuicTimers::default(),
        )
        .unwrap();
        let target = format!("127.0.0.1:{}", listener.local_address().port());

        let (release, held) = std::sync::mpsc::channel();
        let slow = tokio::spawn({
            let target = target.clone();
            async move { connect(&target, held_client_config(held), QuicTimers::default()).await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let fast = connect(&target, tls::client_config(None).unwrap(), QuicTimers::default())
            .await
            .unwrap();
        let fast_port = fast
            ._endpoint
            .as_ref()
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let accepted = tokio::time::timeout(Duration::from_secs(3), listener.accept())
            .await
            .expect("accept must not wait on the stalled handshake")
            .unwrap();
        assert_eq!(accepted.remote_address().port(), fast_port);

        release.send(()).unwrap();
        let slow = slow.await.unwrap().unwrap();
        let accepted_slow = tokio::time::timeout(Duration::from_secs(3), listener.accept())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(accepted_slow.remote_address().port(), fast_port);
        slow.close(0, "done");
        fast.close(0, "done");
    }
}
