use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use url::Url;

use crate::FetchError;

/// A byte stream a pipelined connection can own.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxTransport = Box<dyn Transport>;

/// Dials one fresh transport per call; each pipelined worker calls it once.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<BoxTransport, FetchError>;
}

/// Where pipelined workers dial, derived once from the store endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    pub fn from_url(url: &Url) -> Result<Self, FetchError> {
        let tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(FetchError::Config(format!(
                    "unsupported endpoint scheme {other:?}"
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::Config(format!("endpoint {url} has no host")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| FetchError::Config(format!("endpoint {url} has no port")))?;
        Ok(Self { host, port, tls })
    }
}

/// TCP dialer, wrapping the stream in rustls when the endpoint is `https`.
pub struct TcpConnector {
    endpoint: Endpoint,
    connect_timeout: Duration,
    tls: Option<TlsConnector>,
}

impl TcpConnector {
    pub fn new(endpoint: Endpoint, connect_timeout: Duration) -> Result<Self, FetchError> {
        let tls = if endpoint.tls {
            Some(build_tls_connector()?)
        } else {
            None
        };
        Ok(Self {
            endpoint,
            connect_timeout,
            tls,
        })
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<BoxTransport, FetchError> {
        let addr = (self.endpoint.host.as_str(), self.endpoint.port);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| FetchError::Transport(format!("connect to {}: timeout", self.endpoint.host)))?
            .map_err(|err| FetchError::transport(&format!("connect to {}", self.endpoint.host), err))?;
        stream
            .set_nodelay(true)
            .map_err(|err| FetchError::transport("set_nodelay", err))?;

        let Some(tls) = &self.tls else {
            return Ok(Box::new(stream));
        };

        let server_name = ServerName::try_from(self.endpoint.host.clone())
            .map_err(|err| FetchError::Config(format!("invalid tls server name: {err}")))?;
        let stream = tokio::time::timeout(self.connect_timeout, tls.connect(server_name, stream))
            .await
            .map_err(|_| FetchError::Transport(format!("tls handshake with {}: timeout", self.endpoint.host)))?
            .map_err(|err| {
                FetchError::transport(&format!("tls handshake with {}", self.endpoint.host), err)
            })?;
        Ok(Box::new(stream))
    }
}

fn build_tls_connector() -> Result<TlsConnector, FetchError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|err| FetchError::Config(format!("tls configuration: {err}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}
