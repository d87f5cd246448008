use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Framed, LinesCodec};
use shared::identity::Endpoint;
use shared::types::{DiscoveredGateway, StableEndpointId};
use crate::error::{SessionError, TrustError};
use crate::trust::{PinningVerifier, TlsPolicy, TrustStore};
use super::protocol::{ClientFrame, ServerFrame};

/// Longest frame accepted from the gateway
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Where the next connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTarget {
    /// Also the trust store key
    pub stable_id: StableEndpointId,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub advertised_fingerprint: Option<String>,
    pub display_name: String,
}

impl GatewayTarget {
    /// Direct host:port target; keyed by its textual form.
    pub fn direct(host: &str, port: u16, tls: bool) -> Self {
        let endpoint = Endpoint::HostPort {
            host: host.to_string(),
            port,
        };
        Self {
            stable_id: endpoint.stable_id(),
            host: host.to_string(),
            port,
            tls,
            advertised_fingerprint: None,
            display_name: endpoint.to_string(),
        }
    }
}

impl From<&DiscoveredGateway> for GatewayTarget {
    fn from(gateway: &DiscoveredGateway) -> Self {
        Self {
            stable_id: gateway.stable_id.clone(),
            host: gateway.host.clone(),
            port: gateway.port(),
            tls: gateway.beacon.tls_enabled,
            advertised_fingerprint: gateway.beacon.tls_fingerprint_sha256.clone(),
            display_name: gateway.beacon.display_name.clone(),
        }
    }
}

/// An open, framed connection to a gateway.
#[async_trait]
pub trait GatewayLink: Send {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), SessionError>;

    /// `Ok(None)` once the gateway closed the connection
    async fn recv(&mut self) -> Result<Option<ServerFrame>, SessionError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Open a connection. TLS targets must satisfy `policy` before this
    /// returns; nothing has been sent yet.
    async fn connect(
        &self,
        target: &GatewayTarget,
        policy: Option<&TlsPolicy>,
    ) -> Result<Box<dyn GatewayLink>, SessionError>;
}

/// TCP with optional pinned TLS, newline-delimited JSON frames.
#[derive(Clone)]
pub struct TcpTransport {
    trust: TrustStore,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(trust: TrustStore, connect_timeout: Duration) -> Self {
        Self { trust, connect_timeout }
    }

    async fn handshake_tls(
        &self,
        target: &GatewayTarget,
        policy: &TlsPolicy,
        tcp: TcpStream,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, SessionError> {
        let verifier = Arc::new(PinningVerifier::new(policy));
        let config = verifier.client_config().map_err(|e| connect_error(target, e))?;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(target.host.clone()).map_err(|e| connect_error(target, e))?;

        let tls = match connector.connect(server_name, tcp).await {
            Ok(tls) => tls,
            Err(e) => {
                if let (Some(expected), Some(observed)) = (&policy.expected_fingerprint, verifier.observed()) {
                    if *expected != observed {
                        return Err(SessionError::TlsFingerprintMismatch {
                            store_key: policy.store_key.clone(),
                            expected: expected.clone(),
                            observed,
                        });
                    }
                }
                return Err(connect_error(target, format!("TLS handshake failed: {}", e)));
            }
        };

        let observed = verifier
            .observed()
            .ok_or_else(|| SessionError::Protocol("TLS handshake completed without a certificate".to_string()))?;
        let decision = self.trust.validate(policy, &observed).await?;
        tracing::debug!("Certificate for {} accepted ({:?})", policy.store_key, decision);

        Ok(tls)
    }
}

#[async_trait]
impl GatewayTransport for TcpTransport {
    async fn connect(
        &self,
        target: &GatewayTarget,
        policy: Option<&TlsPolicy>,
    ) -> Result<Box<dyn GatewayLink>, SessionError> {
        if !target.tls {
            if let Some(policy) = policy.filter(|p| p.required) {
                return Err(TrustError::TlsRequired {
                    store_key: policy.store_key.clone(),
                }
                .into());
            }
        }

        let tcp = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| connect_error(target, format!("no answer within {:?}", self.connect_timeout)))?
        .map_err(|e| connect_error(target, e))?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}:{}: {}", target.host, target.port, e);
        }

        tracing::debug!("Connected to {}:{} ({})", target.host, target.port, target.display_name);

        if !target.tls {
            return Ok(Box::new(FramedLink::new(tcp)));
        }

        let policy = policy.ok_or_else(|| SessionError::Untrusted {
            store_key: target.stable_id.to_string(),
            reason: "no TLS policy for an encrypted target".to_string(),
        })?;
        let tls = tokio::time::timeout(self.connect_timeout, self.handshake_tls(target, policy, tcp))
            .await
            .map_err(|_| connect_error(target, "TLS handshake timed out"))??;
        Ok(Box::new(FramedLink::new(tls)))
    }
}

fn connect_error(target: &GatewayTarget, e: impl std::fmt::Display) -> SessionError {
    SessionError::Connect {
        target: format!("{}:{}", target.host, target.port),
        message: e.to_string(),
    }
}

/// JSON lines over any byte stream.
pub struct FramedLink<S> {
    framed: Framed<S, LinesCodec>,
}

impl<S> FramedLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN)),
        }
    }
}

#[async_trait]
impl<S> GatewayLink for FramedLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: ClientFrame) -> Result<(), SessionError> {
        let line = serde_json::to_string(&frame)
            .map_err(|e| SessionError::Protocol(format!("failed to encode frame: {}", e)))?;
        self.framed
            .send(line)
            .await
            .map_err(|e| SessionError::TransportDropped(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<ServerFrame>, SessionError> {
        loop {
            match self.framed.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(SessionError::TransportDropped(e.to_string())),
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => {
                    return serde_json::from_str(&line)
                        .map(Some)
                        .map_err(|e| SessionError::Protocol(format!("invalid frame: {}", e)));
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = SinkExt::<String>::close(&mut self.framed).await {
            tracing::debug!("Error closing gateway connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;
    use crate::session::protocol::InvokeResponse;
    use crate::trust::{fingerprint_sha256, TrustDb};

    fn trust() -> TrustStore {
        TrustStore::spawn(TrustDb::open(":memory:").unwrap())
    }

    #[tokio::test]
    async fn test_framed_link_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let mut link = FramedLink::new(client);
        let (read, mut write) = tokio::io::split(server);
        let mut lines = BufReader::new(read).lines();

        link.send(ClientFrame::InvokeResult(InvokeResponse::unavailable("1"))).await.unwrap();
        let sent = lines.next_line().await.unwrap().unwrap();
        assert!(sent.contains("\"type\":\"invoke-result\""));

        write.write_all(b"\n{\"type\":\"hello-ok\"}\n").await.unwrap();
        assert_eq!(link.recv().await.unwrap(), Some(ServerFrame::HelloOk { server: None }));

        write.write_all(b"not json\n").await.unwrap();
        assert!(matches!(link.recv().await, Err(SessionError::Protocol(_))));

        drop(write);
        drop(lines);
        assert_eq!(link.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_required_tls_refuses_plaintext_target() {
        let transport = TcpTransport::new(trust(), Duration::from_secs(1));
        let target = GatewayTarget::direct("127.0.0.1", 9, false);
        let policy = TlsPolicy {
            required: true,
            expected_fingerprint: None,
            allow_tofu: true,
            store_key: target.stable_id.to_string(),
        };

        let result = transport.connect(&target, Some(&policy)).await;
        assert!(matches!(result, Err(SessionError::Untrusted { .. })));
    }

    #[tokio::test]
    async fn test_plaintext_connect_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let gateway = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(tcp).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let transport = TcpTransport::new(trust(), Duration::from_secs(1));
        let target = GatewayTarget::direct("127.0.0.1", port, false);
        let mut link = transport.connect(&target, None).await.unwrap();
        link.send(ClientFrame::InvokeResult(InvokeResponse::unavailable("3"))).await.unwrap();

        let line = gateway.await.unwrap();
        assert!(line.contains("\"id\":\"3\""));
        link.close().await;
    }

    /// TLS gateway on localhost answering hello-ok to anything.
    async fn tls_gateway() -> (u16, String) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_der = cert.cert.der().clone();
        let fingerprint = fingerprint_sha256(cert_der.as_ref());
        let key = rustls::pki_types::PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());

        let config = rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    if let Ok(mut tls) = acceptor.accept(tcp).await {
                        let _ = tls.write_all(b"{\"type\":\"hello-ok\"}\n").await;
                        let _ = tls.flush().await;
                        let mut buf = [0u8; 256];
                        let _ = tokio::io::AsyncReadExt::read(&mut tls, &mut buf).await;
                    }
                });
            }
        });

        (port, fingerprint)
    }

    #[tokio::test]
    async fn test_tls_first_use_pins_certificate() {
        let (port, fingerprint) = tls_gateway().await;
        let trust = trust();
        let transport = TcpTransport::new(trust.clone(), Duration::from_secs(5));
        let target = GatewayTarget::direct("127.0.0.1", port, true);

        let policy = trust.policy_for(target.stable_id.as_str(), true, None).await.unwrap();
        let mut link = transport.connect(&target, Some(&policy)).await.unwrap();
        assert_eq!(link.recv().await.unwrap(), Some(ServerFrame::HelloOk { server: None }));
        link.close().await;

        assert_eq!(trust.fingerprint(target.stable_id.as_str()).await.unwrap(), Some(fingerprint));
    }

    #[tokio::test]
    async fn test_tls_pinned_mismatch_fails_handshake() {
        let (port, _) = tls_gateway().await;
        let trust = trust();
        let transport = TcpTransport::new(trust.clone(), Duration::from_secs(5));
        let target = GatewayTarget::direct("127.0.0.1", port, true);
        let stale = "ab".repeat(32);
        trust.pin_if_absent(target.stable_id.as_str(), &stale).await.unwrap();

        let policy = trust.policy_for(target.stable_id.as_str(), true, None).await.unwrap();
        match transport.connect(&target, Some(&policy)).await {
            Err(SessionError::TlsFingerprintMismatch { expected, .. }) => assert_eq!(expected, stale),
            Err(other) => panic!("expected mismatch, got {:?}", other),
            Ok(_) => panic!("expected mismatch, got a connection"),
        }
    }
}
