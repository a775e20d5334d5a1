//! Pluggable transport: TCP, TLS and Unix-socket details are
//! assumed provided by a transport the core is not responsible for
//! designing, but a concrete, idiomatic implementation is still required for
//! the crate to connect to anything.

use crate::connection_info::ConnectionAddr;
use crate::error::{ErrorKind, RedisError, RedisResult};
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Anything that can act as the byte stream under a [`crate::handler::CommandHandler`].
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<S> AsyncStream for S where S: AsyncRead + AsyncWrite + Send + Unpin {}

/// A boxed, type-erased connected stream.
pub type BoxedStream = Pin<Box<dyn AsyncStream>>;

/// Connects a [`ConnectionAddr`] to a live byte stream. TCP, TLS and Unix
/// domain sockets each implement this; tests substitute an in-memory pair.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the connection described by `addr`.
    async fn connect(&self, addr: &ConnectionAddr) -> RedisResult<BoxedStream>;
}

/// The default transport: plain TCP, TLS-over-TCP (feature `tls-rustls`),
/// and Unix domain sockets on platforms that have them.
#[derive(Default, Clone, Copy)]
pub struct DefaultTransport {
    /// Whether to set `TCP_NODELAY` on new sockets.
    pub tcp_nodelay: bool,
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn connect(&self, addr: &ConnectionAddr) -> RedisResult<BoxedStream> {
        match addr {
            ConnectionAddr::Tcp { host, port } => {
                let stream = connect_tcp(host, *port, self.tcp_nodelay).await?;
                Ok(Box::pin(stream))
            }
            ConnectionAddr::TcpTls { host, port, insecure } => {
                #[cfg(feature = "tls-rustls")]
                {
                    let tcp = connect_tcp(host, *port, self.tcp_nodelay).await?;
                    let stream = tls::connect(host, tcp, *insecure).await?;
                    Ok(Box::pin(stream))
                }
                #[cfg(not(feature = "tls-rustls"))]
                {
                    let _ = insecure;
                    let _ = (host, port);
                    Err(RedisError::from((
                        ErrorKind::InvalidClientConfig,
                        "TLS support requires the `tls-rustls` feature",
                    )))
                }
            }
            ConnectionAddr::Unix { path } => {
                #[cfg(unix)]
                {
                    let stream = tokio::net::UnixStream::connect(path).await?;
                    Ok(Box::pin(stream))
                }
                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(RedisError::from((
                        ErrorKind::InvalidClientConfig,
                        "Unix domain sockets are not supported on this platform",
                    )))
                }
            }
        }
    }
}

async fn connect_tcp(host: &str, port: u16, tcp_nodelay: bool) -> RedisResult<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    if tcp_nodelay {
        stream.set_nodelay(true)?;
    }
    #[cfg(feature = "keep-alive")]
    {
        let std_socket = stream.into_std()?;
        let socket2: socket2::Socket = std_socket.into();
        socket2.set_tcp_keepalive(&socket2::TcpKeepalive::new())?;
        return Ok(TcpStream::from_std(socket2.into())?);
    }
    #[cfg(not(feature = "keep-alive"))]
    Ok(stream)
}

#[cfg(feature = "tls-rustls")]
mod tls {
    use super::*;
    use rustls_pki_types::ServerName;
    use std::sync::Arc;
    use tokio_rustls::{client::TlsStream, TlsConnector};

    /// Skips certificate verification entirely; only reachable with
    /// `rediss://...?insecure=true`.
    #[derive(Debug)]
    struct NoVerifier;

    impl rustls::client::danger::ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &rustls_pki_types::CertificateDer<'_>,
            _intermediates: &[rustls_pki_types::CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: rustls_pki_types::UnixTime,
        ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
            Ok(rustls::client::danger::ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &rustls_pki_types::CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &rustls_pki_types::CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }

    fn root_store() -> RedisResult<rustls::RootCertStore> {
        let mut store = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            let _ = store.add(cert);
        }
        Ok(store)
    }

    pub(super) async fn connect(
        host: &str,
        tcp: TcpStream,
        insecure: bool,
    ) -> RedisResult<TlsStream<TcpStream>> {
        let config = if insecure {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        } else {
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store()?)
                .with_no_client_auth()
        };
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_owned()).map_err(|_| {
            RedisError::from((
                ErrorKind::InvalidClientConfig,
                "Invalid TLS server name",
            ))
        })?;
        connector
            .connect(server_name, tcp)
            .await
            .map_err(RedisError::from)
    }
}
