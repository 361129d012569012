//! Byte-stream transports
//!
//! GIOP only needs an ordered, reliable byte stream. The [`Transport`]
//! trait hides where that stream comes from; [`TcpTransport`] is the IIOP
//! mapping.

use crate::error::{GiopError, Result};
use async_trait::async_trait;
use corba_cdr::IiopProfile;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Any bidirectional async byte stream
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Network address of a GIOP endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn from_profile(profile: &IiopProfile) -> Self {
        Self::new(profile.host.clone(), profile.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Source of connections
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream>;

    async fn listen(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportListener>>;
}

/// Accepting side of a transport
#[async_trait]
pub trait TransportListener: Send + Sync {
    /// Wait for the next connection; returns the stream and a peer label
    async fn accept(&self) -> Result<(BoxedStream, String)>;

    /// Address peers should use to reach this listener
    fn local_endpoint(&self) -> Result<Endpoint>;
}

/// IIOP over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream> {
        let addr = endpoint.to_string();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| GiopError::Timeout)??;
        stream.set_nodelay(true)?;
        debug!("connected to {}", addr);
        Ok(Box::new(stream))
    }

    async fn listen(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportListener>> {
        let listener = TcpListener::bind(endpoint.to_string()).await?;
        Ok(Box::new(TcpTransportListener {
            listener,
            advertised_host: endpoint.host.clone(),
        }))
    }
}

struct TcpTransportListener {
    listener: TcpListener,
    advertised_host: String,
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    async fn accept(&self) -> Result<(BoxedStream, String)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), peer.to_string()))
    }

    fn local_endpoint(&self) -> Result<Endpoint> {
        let addr = self.listener.local_addr()?;
        // a wildcard bind is advertised by its IP, otherwise keep the name given
        let host = if self.advertised_host.is_empty() || addr.ip().is_unspecified() {
            addr.ip().to_string()
        } else {
            self.advertised_host.clone()
        };
        Ok(Endpoint::new(host, addr.port()))
    }
}
