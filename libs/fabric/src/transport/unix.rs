use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::transport::{BoxTransport, TransportListener};

/// Dials Unix domain socket streams
#[derive(Debug, Clone, Default)]
pub struct UnixConnector {
    connect_timeout: Option<Duration>,
}

impl UnixConnector {
    /// Create a connector with no connect timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Connect with the configured settings
    pub async fn connect(&self, path: impl AsRef<Path>) -> Result<UnixStream> {
        let connect_op = UnixStream::connect(path.as_ref());

        let stream = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::ConnectTimeout(timeout))??
        } else {
            connect_op.await?
        };

        Ok(stream)
    }
}

/// Unix socket listener for accepting incoming connections
pub struct UnixTransportListener {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixTransportListener {
    /// Bind to a Unix socket path
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Remove existing socket file if it exists
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    /// Get the path this listener is bound to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixTransportListener {
    fn drop(&mut self) {
        // Clean up socket file on drop
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait::async_trait]
impl TransportListener for UnixTransportListener {
    async fn accept(&mut self) -> Result<(BoxTransport, String)> {
        let (stream, _) = self.listener.accept().await?;
        Ok((Box::new(stream), format!("unix:{}", self.path.display())))
    }

    fn local_endpoint(&self) -> Result<Endpoint> {
        Ok(Endpoint::Unix(self.path.clone()))
    }
}
