use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::transport::{BoxTransport, TransportListener};

/// Dials TCP streams
///
/// Framing is left to the codec running over the stream.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
    nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            nodelay: true,
        }
    }
}

impl TcpConnector {
    /// Create a connector with no connect timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Enable or disable Nagle's algorithm on new streams
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Connect with the configured settings
    pub async fn connect(&self, addr: SocketAddr) -> Result<TcpStream> {
        let connect_op = TcpStream::connect(addr);

        let stream = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::ConnectTimeout(timeout))??
        } else {
            connect_op.await?
        };

        stream.set_nodelay(self.nodelay)?;
        Ok(stream)
    }
}

/// TCP listener for accepting incoming connections
pub struct TcpTransportListener {
    listener: TcpListener,
}

impl TcpTransportListener {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl TransportListener for TcpTransportListener {
    async fn accept(&mut self) -> Result<(BoxTransport, String)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), addr.to_string()))
    }

    fn local_endpoint(&self) -> Result<Endpoint> {
        self.local_addr().map(Endpoint::Tcp)
    }
}
