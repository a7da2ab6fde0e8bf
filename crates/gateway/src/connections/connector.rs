use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pk_domain::config::{split_endpoint, GatewayConfig};
use pk_domain::AppKey;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use super::credentials::{CredentialError, CredentialSource, Credentials};
use super::GatewayStream;

/// Which gateway service to dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Push,
    Feedback,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("TLS config: {0}")]
    Tls(String),
    #[error("invalid endpoint \"{0}\"")]
    Endpoint(String),
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS handshake: {0}")]
    Handshake(String),
}

/// Opens authenticated byte streams to the gateway.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self, app: &AppKey, service: Service) -> Result<GatewayStream, ConnectError>;
}

/// Mutual-TLS connector: the app's client certificate, the configured CA
/// bundle as trust roots, and TCP / handshake timeouts.
pub struct TlsGatewayConnector {
    gateway: GatewayConfig,
    roots: Arc<RootCertStore>,
    credentials: Arc<dyn CredentialSource>,
}

impl TlsGatewayConnector {
    pub fn new(
        gateway: GatewayConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ConnectError> {
        let roots = load_roots(&gateway.ca_bundle)?;
        tracing::info!(
            ca_bundle = %gateway.ca_bundle.display(),
            roots = roots.len(),
            "gateway trust roots loaded"
        );
        Ok(Self {
            gateway,
            roots: Arc::new(roots),
            credentials,
        })
    }

    fn endpoint(&self, app: &AppKey, service: Service) -> &str {
        match service {
            Service::Push => self.gateway.push_endpoint(app.is_sandbox()),
            Service::Feedback => self.gateway.feedback_endpoint(app.is_sandbox()),
        }
    }
}

#[async_trait]
impl GatewayConnector for TlsGatewayConnector {
    async fn connect(&self, app: &AppKey, service: Service) -> Result<GatewayStream, ConnectError> {
        let credentials = self.credentials.load(app).await?;
        let config = client_config(self.roots.as_ref().clone(), &credentials)?;

        let endpoint = self.endpoint(app, service);
        let (host, port) =
            split_endpoint(endpoint).ok_or_else(|| ConnectError::Endpoint(endpoint.to_owned()))?;

        let tcp = timeout(
            Duration::from_millis(self.gateway.connect_timeout_ms),
            TcpStream::connect((host, port)),
        )
        .await
        .map_err(|_| ConnectError::Timeout {
            operation: "TCP connect",
        })??;
        tcp.set_nodelay(true)?;

        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| ConnectError::Handshake(format!("invalid server name {host}: {e}")))?;
        let tls = timeout(
            Duration::from_millis(self.gateway.handshake_timeout_ms),
            TlsConnector::from(Arc::new(config)).connect(server_name, tcp),
        )
        .await
        .map_err(|_| ConnectError::Timeout {
            operation: "TLS handshake",
        })?
        .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        tracing::debug!(app = %app, endpoint = %endpoint, ?service, "gateway connection established");
        Ok(Box::new(tls))
    }
}

fn load_roots(path: &Path) -> Result<RootCertStore, ConnectError> {
    let pem = std::fs::read(path)
        .map_err(|e| ConnectError::Tls(format!("reading CA bundle {}: {e}", path.display())))?;
    let certs = parse_certificates(&pem)?;
    if certs.is_empty() {
        return Err(ConnectError::Tls(format!(
            "no certificates in CA bundle {}",
            path.display()
        )));
    }
    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| ConnectError::Tls(format!("rejected CA certificate: {e}")))?;
    }
    Ok(roots)
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, ConnectError> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectError::Tls(format!("invalid certificate PEM: {e}")))
}

fn client_config(roots: RootCertStore, credentials: &Credentials) -> Result<ClientConfig, ConnectError> {
    let chain = parse_certificates(&credentials.cert_pem)?;
    if chain.is_empty() {
        return Err(ConnectError::Tls("client certificate PEM holds no certificate".into()));
    }
    let key = PrivateKeyDer::from_pem_slice(&credentials.key_pem)
        .map_err(|e| ConnectError::Tls(format!("invalid private key PEM: {e}")))?;

    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectError::Tls(format!("protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| ConnectError::Tls(format!("client certificate: {e}")))
}
