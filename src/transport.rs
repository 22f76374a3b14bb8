use std::io;
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio_rustls::TlsConnector;
use tracing::{debug, error, warn};

use crate::error::ConnError;
use crate::options::Options;

/// Byte stream a connection runs over: plain TCP, TLS, or anything the
/// caller hands to `Connection::connect_with`.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Open the transport described by `options`.
pub async fn open(options: &Options) -> Result<BoxedTransport, ConnError> {
    let tcp = connect_tcp(options).await?;
    if options.ssl {
        debug!(addr = %options.addr(), "starting TLS handshake");
        let tls = connect_tls(options, tcp).await?;
        debug!("TLS handshake complete");
        Ok(Box::new(tls))
    } else {
        Ok(Box::new(tcp))
    }
}

async fn connect_tcp(options: &Options) -> Result<TcpStream, ConnError> {
    let mut last_err: Option<io::Error> = None;
    for addr in lookup_host((options.host.as_str(), options.port)).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(options.keep_alive)?;
        match socket.connect(addr).await {
            Ok(stream) => {
                debug!(%addr, keep_alive = options.keep_alive, "tcp connected");
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "tcp connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses resolved for {}", options.addr()),
            )
        })
        .into())
}

async fn connect_tls(
    options: &Options,
    tcp: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, ConnError> {
    let config = tls_config(options)?;
    let server_name = ServerName::try_from(options.host.clone()).map_err(|e| {
        ConnError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid TLS server name '{}': {}", options.host, e),
        ))
    })?;
    TlsConnector::from(config)
        .connect(server_name, tcp)
        .await
        .map_err(classify_tls_error)
}

/// Client TLS configuration for `options`.
///
/// A caller-supplied `ssl_config` is returned unchanged. Otherwise the broker
/// certificate is checked against `ssl_roots`, or the webpki roots when none
/// are given: with `ssl_validate` an untrusted certificate aborts the
/// handshake, without it the certificate is logged and accepted.
pub fn tls_config(options: &Options) -> Result<Arc<ClientConfig>, ConnError> {
    if let Some(config) = &options.ssl_config {
        debug!("using caller-supplied TLS configuration");
        return Ok(config.clone());
    }
    let validate = options.ssl_validate;
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let inner = WebPkiServerVerifier::builder_with_provider(trust_anchors(options), provider.clone())
        .build()
        .map_err(|e| ConnError::Protocol(format!("tls verifier: {}", e)))?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnError::Protocol(format!("tls protocol versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(CertificatePolicy { inner, validate }))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

fn trust_anchors(options: &Options) -> Arc<RootCertStore> {
    match &options.ssl_roots {
        Some(roots) => {
            debug!(roots = roots.len(), "using configured TLS trust anchors");
            roots.clone()
        }
        None => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(roots)
        }
    }
}

fn classify_tls_error(err: io::Error) -> ConnError {
    let rejected = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|e| matches!(e, rustls::Error::InvalidCertificate(_)));
    if rejected {
        ConnError::SslValidation(err.to_string())
    } else {
        ConnError::Io(err)
    }
}

/// Certificate check that defers to webpki and, when validation is not
/// required, downgrades a rejection to a warning.
#[derive(Debug)]
struct CertificatePolicy {
    inner: Arc<WebPkiServerVerifier>,
    validate: bool,
}

impl ServerCertVerifier for CertificatePolicy {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(e) if self.validate => {
                error!(error = %e, "broker certificate is not authorized");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "broker certificate is not authorized, continuing without validation");
                Ok(ServerCertVerified::assertion())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn ring_config(roots: RootCertStore) -> ClientConfig {
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .expect("protocol versions")
            .with_root_certificates(roots)
            .with_no_client_auth()
    }

    #[test]
    fn tls_config_builds_in_both_modes() {
        assert!(tls_config(&Options::new().ssl(true).ssl_validate(true)).is_ok());
        assert!(tls_config(&Options::new().ssl(true)).is_ok());
    }

    #[test]
    fn default_trust_anchors_are_webpki() {
        let roots = trust_anchors(&Options::new());
        assert_eq!(roots.len(), webpki_roots::TLS_SERVER_ROOTS.len());
    }

    #[test]
    fn configured_roots_replace_webpki() {
        let private_ca = RootCertStore {
            roots: vec![webpki_roots::TLS_SERVER_ROOTS[0].clone()],
        };
        let opts = Options::new().ssl(true).ssl_validate(true).ssl_roots(private_ca);
        let roots = trust_anchors(&opts);
        assert_eq!(roots.len(), 1);
        assert!(Arc::ptr_eq(&roots, opts.ssl_roots.as_ref().expect("roots")));
        assert!(tls_config(&opts).is_ok());
    }

    #[test]
    fn empty_configured_roots_are_rejected() {
        let opts = Options::new().ssl(true).ssl_roots(RootCertStore::empty());
        assert!(matches!(tls_config(&opts), Err(ConnError::Protocol(_))));
    }

    #[test]
    fn supplied_client_config_is_used_as_is() {
        let config = Arc::new(ring_config(RootCertStore::empty()));
        let opts = Options::new()
            .ssl(true)
            .ssl_roots(RootCertStore::empty())
            .ssl_config(config.clone());
        let used = tls_config(&opts).expect("config");
        assert!(Arc::ptr_eq(&used, &config));
    }

    #[test]
    fn classify_plain_io_error() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(classify_tls_error(err), ConnError::Io(_)));
    }

    #[test]
    fn classify_certificate_rejection() {
        let err = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        assert!(matches!(classify_tls_error(err), ConnError::SslValidation(_)));
    }

    #[tokio::test]
    async fn open_plain_tcp_with_keep_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let opts = Options::new().port(port).keep_alive(true);
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        assert!(open(&opts).await.is_ok());
        assert!(accept.await.expect("join").is_ok());
    }

    #[tokio::test]
    async fn open_refused_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let opts = Options::new().port(port);
        assert!(matches!(open(&opts).await, Err(ConnError::Io(_))));
    }
}
