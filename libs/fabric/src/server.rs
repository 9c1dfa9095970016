//! Server side: accepts connections and dispatches requests to services.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::BytesMut;
use meridian_core::{
    Controller, ControllerRef, DynMessage, ErrorKind, MethodDescriptor, RpcError, Service,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, watch};

use crate::codec::{MessageKind, RpcCodec, RpcMessage, DEFAULT_MAX_FRAME_LEN};
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::event_loop::EventLoopHandle;
use crate::transport::{self, BoxTransport, TransportListener};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Serves registered [`Service`]s over any number of listeners
///
/// Requests are decoded and dispatched on the event loop. Handlers may
/// answer inline or later from any thread.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    event_loop: EventLoopHandle,
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
    codec: RpcCodec,
    connections: Mutex<HashMap<u64, Connection>>,
    closing: watch::Sender<bool>,
}

impl RpcServer {
    pub fn new(event_loop: EventLoopHandle) -> Self {
        Self::with_max_frame_len(event_loop, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(event_loop: EventLoopHandle, max_frame_len: usize) -> Self {
        let (closing, _) = watch::channel(false);
        let inner = Arc::new_cyclic(|weak: &Weak<ServerInner>| {
            let mut codec = RpcCodec::with_max_frame_len(max_frame_len);
            let weak = weak.clone();
            codec.set_message_callback(move |connection, message| {
                if let Some(server) = weak.upgrade() {
                    server.on_message(connection, message);
                }
            });
            ServerInner {
                event_loop,
                services: RwLock::new(HashMap::new()),
                codec,
                connections: Mutex::new(HashMap::new()),
                closing,
            }
        });
        Self { inner }
    }

    /// Register `service` under its qualified name, replacing any previous one
    pub fn register_service<S>(&self, service: S)
    where
        S: Service + 'static,
    {
        let name = service.descriptor().full_name().to_owned();
        tracing::debug!(service = %name, "service registered");
        self.inner.services.write().insert(name, Arc::new(service));
    }

    /// Start accepting on `endpoint` and return the bound endpoint
    ///
    /// Binding to port 0 picks a free port; the returned endpoint carries it.
    pub async fn listen(&self, endpoint: &Endpoint) -> Result<Endpoint> {
        let (bound_tx, bound_rx) = oneshot::channel();
        let server = Arc::downgrade(&self.inner);
        let closing = self.inner.closing.subscribe();
        let endpoint = endpoint.clone();

        self.inner.event_loop.run_in_loop(move || {
            tokio::task::spawn_local(async move {
                let listener = match transport::bind(&endpoint).await {
                    Ok(listener) => listener,
                    Err(error) => {
                        let _ = bound_tx.send(Err(error));
                        return;
                    }
                };
                match listener.local_endpoint() {
                    Ok(local) => {
                        tracing::debug!(endpoint = %local, "listening");
                        let _ = bound_tx.send(Ok(local));
                    }
                    Err(error) => {
                        let _ = bound_tx.send(Err(error));
                        return;
                    }
                }
                accept_loop(server, listener, closing).await;
            });
        })?;

        bound_rx.await.map_err(|_| Error::EventLoopClosed)?
    }

    /// Number of open client connections
    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Stop accepting and close every open connection
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl ServerInner {
    fn on_accept(self: &Arc<Self>, transport: BoxTransport, peer: String) {
        let on_bytes = Arc::downgrade(self);
        let on_close = Arc::downgrade(self);
        let connection = Connection::spawn(
            transport,
            peer,
            move |connection, buffer| {
                if let Some(server) = on_bytes.upgrade() {
                    server.codec.parse_from_buffer(connection, buffer);
                }
            },
            move |connection, _reason| {
                if let Some(server) = on_close.upgrade() {
                    server.connections.lock().remove(&connection.id());
                }
            },
        );
        tracing::debug!(connection = connection.id(), peer = %connection.peer(), "accepted");
        self.connections.lock().insert(connection.id(), connection);
    }

    fn on_message(self: &Arc<Self>, connection: &Connection, message: RpcMessage) {
        if message.kind != MessageKind::Request {
            tracing::warn!(peer = %connection.peer(), call_id = message.id, "unexpected reply on server connection");
            return;
        }
        let RpcMessage {
            id,
            method: method_name,
            payload,
            ..
        } = message;

        let (service, method) = match self.lookup(&method_name) {
            Ok(found) => found,
            Err(error) => {
                tracing::debug!(call_id = id, method = %method_name, %error, "rejecting request");
                self.send_reply(connection, id, &method_name, Err(error));
                return;
            }
        };

        let request = match service.request_prototype(&method).decode(&payload) {
            Ok(request) => request,
            Err(error) => {
                self.send_reply(connection, id, &method_name, Err(error));
                return;
            }
        };

        let response_type = service.response_prototype(&method);
        let connection = connection.clone();
        let server = Arc::downgrade(self);
        service.call_method(
            &method,
            Controller::new(),
            request,
            response_type,
            Box::new(move |controller: &ControllerRef, response: Option<DynMessage>| {
                let outcome = match (controller.error(), response) {
                    (None, Some(response)) => Ok(response),
                    (Some(error), _) => Err(error),
                    (None, None) => Err(RpcError::new(
                        ErrorKind::Application,
                        "handler completed without a response",
                    )),
                };
                match server.upgrade() {
                    Some(server) => server.send_reply(&connection, id, &method_name, outcome),
                    None => tracing::debug!(call_id = id, "server gone before the reply"),
                }
            }),
        );
    }

    fn send_reply(
        &self,
        connection: &Connection,
        id: u64,
        method: &str,
        outcome: std::result::Result<DynMessage, RpcError>,
    ) {
        let message = match outcome.and_then(|response| response.encode()) {
            Ok(payload) => RpcMessage::response(id, method, payload),
            Err(error) => RpcMessage::error(id, method, &error),
        };

        let mut buffer = BytesMut::new();
        if let Err(error) = self.codec.serialize_to_buffer(&message, &mut buffer) {
            tracing::warn!(call_id = id, %method, %error, "reply could not be framed");
            let fallback = RpcMessage::error(id, method, &error);
            if self.codec.serialize_to_buffer(&fallback, &mut buffer).is_err() {
                return;
            }
        }

        if !connection.send(buffer.freeze()) {
            tracing::debug!(call_id = id, peer = %connection.peer(), "client went away before the reply");
        }
    }

    fn lookup(
        &self,
        qualified: &str,
    ) -> std::result::Result<(Arc<dyn Service>, Arc<MethodDescriptor>), RpcError> {
        let (service_name, method_name) = qualified.rsplit_once('.').ok_or_else(|| {
            RpcError::new(
                ErrorKind::UnknownMethod,
                format!("malformed method name {qualified:?}"),
            )
        })?;
        let service = self
            .services
            .read()
            .get(service_name)
            .cloned()
            .ok_or_else(|| {
                RpcError::new(
                    ErrorKind::UnknownService,
                    format!("no service named {service_name}"),
                )
            })?;
        let method = service
            .descriptor()
            .method(method_name)
            .cloned()
            .ok_or_else(|| {
                RpcError::new(
                    ErrorKind::UnknownMethod,
                    format!("{service_name} has no method {method_name}"),
                )
            })?;
        Ok((service, method))
    }

    fn shutdown(&self) {
        self.closing.send_replace(true);
        let connections: Vec<Connection> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.shutdown();
        }
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    server: Weak<ServerInner>,
    mut listener: Box<dyn TransportListener>,
    mut closing: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = closing.wait_for(|closing| *closing) => break,
            accepted = listener.accept() => accepted,
        };
        let Some(server) = server.upgrade() else {
            break;
        };
        match accepted {
            Ok((transport, peer)) => server.on_accept(transport, peer),
            Err(error) => {
                drop(server);
                tracing::warn!(%error, "accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
    tracing::debug!("listener stopped");
}
