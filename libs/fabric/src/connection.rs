use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use meridian_core::{ErrorKind, RpcError};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use crate::transport::Transport;

const READ_BUFFER_SIZE: usize = 8 * 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One established byte stream, driven by its event loop
///
/// Cloning yields another handle to the same connection. `send` may be
/// called from any thread; reads and the byte-arrival callback happen on the
/// loop thread that spawned the connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: u64,
    peer: String,
    outbound: mpsc::UnboundedSender<Bytes>,
    closed: watch::Sender<bool>,
    close_reason: Mutex<Option<RpcError>>,
}

impl Connection {
    fn new(peer: String) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (outbound, queued) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                peer,
                outbound,
                closed,
                close_reason: Mutex::new(None),
            }),
        };
        (connection, queued)
    }

    /// A connection with no transport behind it; sends are dropped.
    ///
    /// Useful for driving a codec by hand.
    pub fn unbound(peer: impl Into<String>) -> Self {
        Self::new(peer.into()).0
    }

    /// Start reader and writer tasks for `transport` on the current `LocalSet`.
    ///
    /// `on_bytes` sees the receive buffer after every read and consumes what
    /// it can. `on_close` runs once when the connection ends, with the
    /// reason if it ended abnormally.
    pub(crate) fn spawn<T, B, C>(transport: T, peer: String, mut on_bytes: B, on_close: C) -> Self
    where
        T: Transport,
        B: FnMut(&Connection, &mut BytesMut) + 'static,
        C: FnOnce(&Connection, Option<RpcError>) + 'static,
    {
        let (connection, mut queued) = Self::new(peer);
        let (mut reader, mut writer) = tokio::io::split(transport);

        let conn = connection.clone();
        tokio::task::spawn_local(async move {
            let mut closed = conn.inner.closed.subscribe();
            loop {
                tokio::select! {
                    biased;
                    bytes = queued.recv() => match bytes {
                        Some(bytes) => {
                            if let Err(err) = writer.write_all(&bytes).await {
                                conn.close_with_error(RpcError::new(
                                    ErrorKind::ConnectionClosed,
                                    format!("write to {} failed: {err}", conn.peer()),
                                ));
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = closed.wait_for(|closed| *closed) => {
                        while let Ok(bytes) = queued.try_recv() {
                            if writer.write_all(&bytes).await.is_err() {
                                break;
                            }
                        }
                        break;
                    }
                }
            }
            let _ = writer.shutdown().await;
        });

        let conn = connection.clone();
        tokio::task::spawn_local(async move {
            let mut closed = conn.inner.closed.subscribe();
            let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
            let reason = loop {
                tokio::select! {
                    biased;
                    _ = closed.wait_for(|closed| *closed) => break conn.take_close_reason(),
                    read = reader.read_buf(&mut buffer) => match read {
                        Ok(0) => {
                            break Some(RpcError::new(
                                ErrorKind::ConnectionClosed,
                                format!("{} closed the connection", conn.peer()),
                            ));
                        }
                        Ok(n) => {
                            tracing::trace!(connection = conn.id(), bytes = n, "read");
                            on_bytes(&conn, &mut buffer);
                            if !conn.is_connected() {
                                break conn.take_close_reason();
                            }
                        }
                        Err(err) => {
                            break Some(RpcError::new(
                                ErrorKind::ConnectionClosed,
                                format!("read from {} failed: {err}", conn.peer()),
                            ));
                        }
                    },
                }
            };
            conn.shutdown();
            tracing::debug!(connection = conn.id(), peer = %conn.peer(), ?reason, "connection closed");
            on_close(&conn, reason);
        });

        connection
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    pub fn is_connected(&self) -> bool {
        !*self.inner.closed.borrow()
    }

    /// Queue bytes for writing. Returns `false` once the connection is closed.
    pub fn send(&self, bytes: Bytes) -> bool {
        self.is_connected() && self.inner.outbound.send(bytes).is_ok()
    }

    /// Close the connection; already queued bytes are still flushed
    pub fn shutdown(&self) {
        self.inner.closed.send_replace(true);
    }

    /// Close the connection, recording why. The first reason wins.
    pub fn close_with_error(&self, error: RpcError) {
        self.inner.close_reason.lock().get_or_insert(error);
        self.shutdown();
    }

    fn take_close_reason(&self) -> Option<RpcError> {
        self.inner.close_reason.lock().take()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}
