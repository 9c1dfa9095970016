use tokio::io::{AsyncRead, AsyncWrite};

use crate::endpoint::Endpoint;
use crate::error::Result;

pub mod tcp;
pub mod unix;

pub use self::tcp::{TcpConnector, TcpTransportListener};
pub use self::unix::{UnixConnector, UnixTransportListener};

/// Duplex byte stream a connection runs over
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxTransport = Box<dyn Transport>;

/// Opens byte streams to endpoints
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxTransport>;
}

/// Accepts incoming byte streams
#[async_trait::async_trait]
pub trait TransportListener: Send {
    /// Accept the next connection and a printable peer address
    async fn accept(&mut self) -> Result<(BoxTransport, String)>;

    /// Endpoint this listener is bound to
    fn local_endpoint(&self) -> Result<Endpoint>;
}

/// Connector dialing TCP and Unix socket endpoints
#[derive(Debug, Clone, Default)]
pub struct DefaultConnector {
    tcp: TcpConnector,
    unix: UnixConnector,
}

impl DefaultConnector {
    pub fn new(tcp: TcpConnector, unix: UnixConnector) -> Self {
        Self { tcp, unix }
    }
}

#[async_trait::async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxTransport> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Box::new(self.tcp.connect(*addr).await?)),
            Endpoint::Unix(path) => Ok(Box::new(self.unix.connect(path).await?)),
        }
    }
}

/// Bind a listener for `endpoint`
pub async fn bind(endpoint: &Endpoint) -> Result<Box<dyn TransportListener>> {
    match endpoint {
        Endpoint::Tcp(addr) => Ok(Box::new(TcpTransportListener::bind(*addr).await?)),
        Endpoint::Unix(path) => Ok(Box::new(UnixTransportListener::bind(path).await?)),
    }
}
