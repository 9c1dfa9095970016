//! Client-side channel multiplexing unary calls over one connection.
//!
//! All channel state lives on the channel's event loop. Calls made from
//! other threads are marshaled onto the loop; calls made on the loop thread
//! (for instance from inside a completion callback) run inline. Completion
//! callbacks always run on the loop thread and must not block it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use meridian_core::{
    AnyMessage, Completion, ControllerRef, DoneCallback, DynMessage, ErrorKind, Message,
    MessageType, MethodDescriptor, RpcError,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::balancer::LoadBalancer;
use crate::codec::{MessageKind, RpcCodec, RpcMessage};
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::event_loop::EventLoopHandle;
use crate::options::ChannelOptions;
use crate::registry::StrategyRegistry;
use crate::resolver::Resolver;
use crate::transport::{BoxTransport, Connector, DefaultConnector, TcpConnector, UnixConnector};

/// Asynchronous RPC channel to one remote endpoint at a time
///
/// Cheap to clone; clones share the same connection and call table. Each
/// call's callback runs exactly once.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    event_loop: EventLoopHandle,
    options: ChannelOptions,
    resolver: Arc<dyn Resolver>,
    balancer: Arc<dyn LoadBalancer>,
    connector: Arc<dyn Connector>,
    codec: RpcCodec,
    core: Mutex<ChannelCore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Shutdown,
}

/// State only touched on the loop thread
struct ChannelCore {
    state: State,
    generation: u64,
    next_id: u64,
    pending: BTreeMap<u64, PendingCall>,
    connection: Option<Connection>,
    last_error: Option<RpcError>,
}

struct PendingCall {
    method: String,
    response_type: MessageType,
    completion: Completion,
    /// Request frame not yet handed to a connection
    unsent: Option<Bytes>,
    timer: Option<JoinHandle<()>>,
}

impl PendingCall {
    fn finish(self, outcome: std::result::Result<DynMessage, RpcError>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.completion.complete(outcome);
    }
}

/// A call on its way to the loop thread
struct OutgoingCall {
    method: String,
    response_type: MessageType,
    payload: meridian_core::Result<Vec<u8>>,
    completion: Completion,
}

impl ChannelCore {
    fn new() -> Self {
        Self {
            state: State::Idle,
            generation: 0,
            next_id: 1,
            pending: BTreeMap::new(),
            connection: None,
            last_error: None,
        }
    }

    /// Remove the matching calls, in increasing id order
    fn take_calls(&mut self, pred: impl Fn(&PendingCall) -> bool) -> Vec<PendingCall> {
        let (taken, kept): (BTreeMap<_, _>, BTreeMap<_, _>) =
            std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|(_, call)| pred(call));
        self.pending = kept;
        taken.into_values().collect()
    }
}

fn fail_all(calls: Vec<PendingCall>, error: &RpcError) {
    for call in calls {
        call.finish(Err(error.clone()));
    }
}

impl Channel {
    /// Create a builder for a channel driven by `event_loop`
    pub fn builder(event_loop: EventLoopHandle) -> ChannelBuilder {
        ChannelBuilder::new(event_loop)
    }

    /// Channel with default options, strategies and connector
    pub fn new(event_loop: EventLoopHandle) -> Result<Self> {
        Self::builder(event_loop).build()
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.inner.options
    }

    /// Resolve `target`, pick an endpoint and connect to it.
    ///
    /// Returns immediately. Calling again reconnects: calls already written
    /// to the previous connection fail with `ConnectionClosed`, calls not yet
    /// written go to the new connection.
    pub fn connect(&self, target: impl Into<String>) {
        let target = target.into();
        let inner = Arc::clone(&self.inner);
        if self
            .inner
            .event_loop
            .run_in_loop(move || inner.connect_in_loop(target))
            .is_err()
        {
            tracing::warn!("connect ignored: event loop is not running");
        }
    }

    /// Issue a call; `done` runs exactly once on the loop thread.
    ///
    /// `request` must be of `method`'s request type and `response_type` must
    /// be its response type.
    pub fn call_method(
        &self,
        method: &Arc<MethodDescriptor>,
        controller: &ControllerRef,
        request: &dyn AnyMessage,
        response_type: MessageType,
        done: DoneCallback,
    ) {
        debug_assert_eq!(
            request.message_type(),
            method.request_type(),
            "request type does not match {}",
            method.full_name()
        );
        debug_assert_eq!(
            response_type,
            method.response_type(),
            "response prototype does not match {}",
            method.full_name()
        );

        let call = OutgoingCall {
            method: method.full_name().to_owned(),
            response_type,
            payload: request.encode(),
            completion: Completion::new(Arc::clone(controller), done),
        };
        let inner = Arc::clone(&self.inner);
        // A rejected task drops its completion, which fails the call.
        let _ = self
            .inner
            .event_loop
            .run_in_loop(move || inner.call_in_loop(call));
    }

    /// Typed variant of [`call_method`](Self::call_method)
    ///
    /// `done` receives the response already converted to `Resp`.
    pub fn call<Resp, F>(
        &self,
        method: &Arc<MethodDescriptor>,
        controller: &ControllerRef,
        request: &dyn AnyMessage,
        done: F,
    ) where
        Resp: Message,
        F: FnOnce(&ControllerRef, Option<Resp>) + Send + 'static,
    {
        let erased: DoneCallback = Box::new(move |controller: &ControllerRef, response: Option<DynMessage>| {
            let response = response.and_then(|message| match message.into_expected::<Resp>() {
                Ok(response) => Some(response),
                Err(error) => {
                    controller.set_failed(error);
                    None
                }
            });
            done(controller, response);
        });
        self.call_method(method, controller, request, MessageType::of::<Resp>(), erased);
    }

    /// Issue a call and wait for its outcome
    pub async fn unary<Req, Resp>(
        &self,
        method: &Arc<MethodDescriptor>,
        controller: &ControllerRef,
        request: &Req,
    ) -> std::result::Result<Resp, RpcError>
    where
        Req: Message,
        Resp: Message,
    {
        let (tx, rx) = oneshot::channel();
        self.call(method, controller, request, move |controller, response: Option<Resp>| {
            let outcome = response.ok_or_else(|| {
                controller.error().unwrap_or_else(|| {
                    RpcError::new(ErrorKind::DecodeFailure, "call completed without a response")
                })
            });
            let _ = tx.send(outcome);
        });
        rx.await
            .unwrap_or_else(|_| Err(RpcError::new(ErrorKind::Shutdown, "call dropped")))
    }

    /// Fail every pending call with `Shutdown` and close the connection.
    ///
    /// Idempotent. Runs on the loop, so from another thread it takes effect
    /// at the loop's next iteration.
    pub fn shutdown(&self) {
        let inner = Arc::clone(&self.inner);
        let _ = self
            .inner
            .event_loop
            .run_in_loop(move || inner.shutdown_in_loop());
    }

    pub fn is_connected(&self) -> bool {
        self.inner.core.lock().state == State::Connected
    }

    /// Ids of calls still waiting for an outcome, in increasing order
    pub fn pending_call_ids(&self) -> Vec<u64> {
        self.inner.core.lock().pending.keys().copied().collect()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("Channel")
            .field("state", &core.state)
            .field("pending", &core.pending.len())
            .finish_non_exhaustive()
    }
}

impl ChannelInner {
    fn connect_in_loop(self: &Arc<Self>, target: String) {
        let (generation, previous, stale) = {
            let mut core = self.core.lock();
            if core.state == State::Shutdown {
                tracing::warn!(%target, "connect ignored: channel is shut down");
                return;
            }
            core.generation += 1;
            core.state = State::Connecting;
            let stale = core.take_calls(|call| call.unsent.is_none());
            (core.generation, core.connection.take(), stale)
        };

        if let Some(previous) = previous {
            previous.shutdown();
        }
        fail_all(
            stale,
            &RpcError::new(ErrorKind::ConnectionClosed, "channel reconnecting"),
        );

        tracing::debug!(%target, generation, "connecting");
        let weak = Arc::downgrade(self);
        let resolver = Arc::clone(&self.resolver);
        let balancer = Arc::clone(&self.balancer);
        let connector = Arc::clone(&self.connector);
        tokio::task::spawn_local(async move {
            let outcome = establish(&*resolver, &*balancer, &*connector, &target).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_connect_result(generation, outcome);
            }
        });
    }

    fn on_connect_result(
        self: &Arc<Self>,
        generation: u64,
        outcome: std::result::Result<(Endpoint, BoxTransport), RpcError>,
    ) {
        let mut core = self.core.lock();
        if core.generation != generation || core.state != State::Connecting {
            tracing::debug!(generation, "discarding superseded connect attempt");
            return;
        }

        match outcome {
            Ok((endpoint, transport)) => {
                let on_bytes = Arc::downgrade(self);
                let on_close = Arc::downgrade(self);
                let connection = Connection::spawn(
                    transport,
                    endpoint.to_string(),
                    move |connection, buffer| {
                        if let Some(inner) = on_bytes.upgrade() {
                            inner.codec.parse_from_buffer(connection, buffer);
                        }
                    },
                    move |connection, reason| {
                        if let Some(inner) = on_close.upgrade() {
                            inner.on_connection_closed(connection, reason);
                        }
                    },
                );

                // Only calls still pending go on the wire, in id order
                for frame in core.pending.values_mut().filter_map(|call| call.unsent.take()) {
                    connection.send(frame);
                }
                tracing::debug!(%endpoint, connection = connection.id(), pending = core.pending.len(), "connected");
                core.state = State::Connected;
                core.last_error = None;
                core.connection = Some(connection);
            }
            Err(error) => {
                tracing::warn!(%error, "connect attempt failed");
                core.state = State::Disconnected;
                core.last_error = Some(error.clone());
                let calls = core.take_calls(|_| true);
                drop(core);
                fail_all(calls, &error);
            }
        }
    }

    fn on_connection_closed(&self, connection: &Connection, reason: Option<RpcError>) {
        let error = reason.unwrap_or_else(|| {
            RpcError::new(ErrorKind::ConnectionClosed, "connection closed")
        });
        let calls = {
            let mut core = self.core.lock();
            if core.connection.as_ref().map(Connection::id) != Some(connection.id()) {
                return;
            }
            core.connection = None;
            if core.state != State::Shutdown {
                core.state = State::Disconnected;
                core.last_error = Some(error.clone());
            }
            core.take_calls(|_| true)
        };

        if !calls.is_empty() {
            tracing::warn!(peer = %connection.peer(), %error, failed = calls.len(), "connection lost with calls in flight");
        }
        fail_all(calls, &error);
    }

    fn call_in_loop(self: &Arc<Self>, call: OutgoingCall) {
        let OutgoingCall {
            method,
            response_type,
            payload,
            completion,
        } = call;

        if completion.controller().is_canceled() {
            completion.complete(Err(RpcError::new(
                ErrorKind::Cancelled,
                "cancelled before the call was issued",
            )));
            return;
        }
        let payload = match payload {
            Ok(payload) => payload,
            Err(error) => {
                completion.complete(Err(error));
                return;
            }
        };

        let mut guard = self.core.lock();
        let core = &mut *guard;
        let unavailable = match core.state {
            State::Shutdown => Some(RpcError::new(ErrorKind::Shutdown, "channel is shut down")),
            State::Idle => Some(RpcError::new(ErrorKind::ConnectFailure, "channel is not connected")),
            State::Disconnected => Some(core.last_error.clone().unwrap_or_else(|| {
                RpcError::new(ErrorKind::ConnectFailure, "channel is not connected")
            })),
            State::Connecting | State::Connected => None,
        };
        if let Some(error) = unavailable {
            drop(guard);
            completion.complete(Err(error));
            return;
        }

        let id = core.next_id;
        let message = RpcMessage::request(id, method.as_str(), Bytes::from(payload));
        let mut frame = BytesMut::new();
        if let Err(error) = self.codec.serialize_to_buffer(&message, &mut frame) {
            drop(guard);
            completion.complete(Err(error));
            return;
        }
        core.next_id += 1;

        let frame = frame.freeze();
        let unsent = match (&core.connection, core.state) {
            (Some(connection), State::Connected) => {
                connection.send(frame);
                None
            }
            _ => Some(frame),
        };
        let sent = unsent.is_none();

        let timeout = completion
            .controller()
            .timeout()
            .or(self.options.default_timeout);
        let timer = timeout.map(|timeout| {
            let weak = Arc::downgrade(self);
            tokio::task::spawn_local(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = weak.upgrade() {
                    inner.expire(id);
                }
            })
        });

        let controller = Arc::clone(completion.controller());
        tracing::trace!(call_id = id, method = %method, sent, "call issued");
        core.pending.insert(
            id,
            PendingCall {
                method,
                response_type,
                completion,
                unsent,
                timer,
            },
        );
        drop(guard);

        let weak = Arc::downgrade(self);
        controller.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                let event_loop = inner.event_loop.clone();
                let _ = event_loop.run_in_loop(move || inner.cancel_call(id));
            }
        });
    }

    fn on_message(&self, connection: &Connection, message: RpcMessage) {
        if message.kind == MessageKind::Request {
            tracing::warn!(peer = %connection.peer(), method = %message.method, "unexpected request on client channel");
            return;
        }

        let call = {
            let mut core = self.core.lock();
            if core.state == State::Shutdown {
                return;
            }
            core.pending.remove(&message.id)
        };
        let Some(call) = call else {
            tracing::debug!(call_id = message.id, method = %message.method, "discarding response for unknown call");
            return;
        };

        if call.completion.controller().is_canceled() {
            call.finish(Err(RpcError::new(ErrorKind::Cancelled, "call was cancelled")));
            return;
        }

        let outcome = match message.kind {
            MessageKind::Response => call.response_type.decode(&message.payload),
            _ => Err(message.remote_error()),
        };
        tracing::trace!(call_id = message.id, method = %call.method, ok = outcome.is_ok(), "call completed");
        call.finish(outcome);
    }

    fn cancel_call(&self, id: u64) {
        let call = self.core.lock().pending.remove(&id);
        if let Some(call) = call {
            tracing::debug!(call_id = id, method = %call.method, "call cancelled");
            call.finish(Err(RpcError::new(ErrorKind::Cancelled, "call was cancelled")));
        }
    }

    fn expire(&self, id: u64) {
        let call = self.core.lock().pending.remove(&id);
        if let Some(call) = call {
            tracing::debug!(call_id = id, method = %call.method, "call timed out");
            let error = RpcError::new(
                ErrorKind::Timeout,
                format!("deadline exceeded for {}", call.method),
            );
            call.finish(Err(error));
        }
    }

    fn shutdown_in_loop(&self) {
        let (calls, connection) = {
            let mut core = self.core.lock();
            if core.state == State::Shutdown {
                return;
            }
            core.state = State::Shutdown;
            core.generation += 1;
            (core.take_calls(|_| true), core.connection.take())
        };

        tracing::debug!(failed = calls.len(), "channel shut down");
        fail_all(calls, &RpcError::new(ErrorKind::Shutdown, "channel shut down"));
        if let Some(connection) = connection {
            connection.shutdown();
        }
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        core.state = State::Shutdown;
        let calls = core.take_calls(|_| true);
        if let Some(connection) = core.connection.take() {
            connection.shutdown();
        }
        fail_all(calls, &RpcError::new(ErrorKind::Shutdown, "channel dropped"));
    }
}

async fn establish(
    resolver: &dyn Resolver,
    balancer: &dyn LoadBalancer,
    connector: &dyn Connector,
    target: &str,
) -> std::result::Result<(Endpoint, BoxTransport), RpcError> {
    let endpoints = resolver
        .resolve(target)
        .await
        .map_err(|e| RpcError::new(ErrorKind::ResolutionFailure, format!("{target}: {e}")))?;
    let endpoint = balancer.pick(&endpoints).ok_or_else(|| {
        RpcError::new(
            ErrorKind::ResolutionFailure,
            format!("no endpoints resolved for {target}"),
        )
    })?;
    let transport = connector
        .connect(&endpoint)
        .await
        .map_err(|e| RpcError::new(ErrorKind::ConnectFailure, format!("{endpoint}: {e}")))?;
    Ok((endpoint, transport))
}

/// Builder for [`Channel`]
pub struct ChannelBuilder {
    event_loop: EventLoopHandle,
    options: ChannelOptions,
    registry: Option<StrategyRegistry>,
    connector: Option<Arc<dyn Connector>>,
}

impl ChannelBuilder {
    pub fn new(event_loop: EventLoopHandle) -> Self {
        Self {
            event_loop,
            options: ChannelOptions::default(),
            registry: None,
            connector: None,
        }
    }

    pub fn options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    /// Registry the resolver and load balancer names are looked up in
    pub fn registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build the channel, rejecting unknown strategy names
    pub fn build(self) -> Result<Channel> {
        let registry = self.registry.unwrap_or_default();
        let resolver = registry.resolver(&self.options.resolver_name)?;
        let balancer = registry.load_balancer(&self.options.loadbalancer_name)?;
        let connector = self.connector.unwrap_or_else(|| {
            let mut tcp = TcpConnector::new();
            let mut unix = UnixConnector::new();
            if let Some(timeout) = self.options.connect_timeout {
                tcp = tcp.connect_timeout(timeout);
                unix = unix.connect_timeout(timeout);
            }
            Arc::new(DefaultConnector::new(tcp, unix)) as Arc<dyn Connector>
        });

        let event_loop = self.event_loop;
        let options = self.options;
        let inner = Arc::new_cyclic(|weak: &Weak<ChannelInner>| {
            let mut codec = RpcCodec::with_max_frame_len(options.max_frame_len);
            let weak = weak.clone();
            codec.set_message_callback(move |connection, message| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_message(connection, message);
                }
            });
            ChannelInner {
                event_loop,
                options,
                resolver,
                balancer,
                connector,
                codec,
                core: Mutex::new(ChannelCore::new()),
            }
        });

        Ok(Channel { inner })
    }
}
