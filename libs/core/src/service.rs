//! Reflection-based dispatch surface shared by client stubs and servers.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::controller::ControllerRef;
use crate::descriptor::{MethodDescriptor, ServiceDescriptor, ServiceDescriptorBuilder};
use crate::error::{ErrorKind, RpcError};
use crate::message::{DynMessage, Message, MessageType};

/// Type-erased completion callback of a call
///
/// Receives the call's controller and, on success, the response.
pub type DoneCallback = Box<dyn FnOnce(&ControllerRef, Option<DynMessage>) + Send>;

/// A service whose methods can be invoked without knowing its concrete type
///
/// Implemented by client stubs (forwarding to a channel) and by server-side
/// dispatch tables.
pub trait Service: Send + Sync {
    /// Descriptor of this service and its methods
    fn descriptor(&self) -> &Arc<ServiceDescriptor>;

    /// Invoke `method`.
    ///
    /// `method` must belong to [`descriptor`](Service::descriptor), and
    /// `request` / `response_type` must be the types returned by the
    /// prototype lookups. `done` runs exactly once, either before this
    /// returns or later from any thread.
    fn call_method(
        &self,
        method: &Arc<MethodDescriptor>,
        controller: ControllerRef,
        request: DynMessage,
        response_type: MessageType,
        done: DoneCallback,
    );

    fn request_prototype(&self, method: &MethodDescriptor) -> MessageType {
        method.request_type()
    }

    fn response_prototype(&self, method: &MethodDescriptor) -> MessageType {
        method.response_type()
    }
}

/// Guard that runs a [`DoneCallback`] exactly once
///
/// If dropped before [`complete`](Completion::complete) is called, the
/// callback still runs with the controller failed.
pub struct Completion {
    controller: ControllerRef,
    done: Option<DoneCallback>,
    abandoned: (ErrorKind, &'static str),
}

impl Completion {
    pub fn new(controller: ControllerRef, done: DoneCallback) -> Self {
        Self {
            controller,
            done: Some(done),
            abandoned: (ErrorKind::Shutdown, "call abandoned before completion"),
        }
    }

    /// Error reported when the guard is dropped without completing
    pub fn abandoned_with(mut self, kind: ErrorKind, message: &'static str) -> Self {
        self.abandoned = (kind, message);
        self
    }

    pub fn controller(&self) -> &ControllerRef {
        &self.controller
    }

    pub fn complete(mut self, outcome: Result<DynMessage, RpcError>) {
        if let Some(done) = self.done.take() {
            self.finish(done, outcome);
        }
    }

    fn finish(&self, done: DoneCallback, outcome: Result<DynMessage, RpcError>) {
        self.controller.clear_cancel_hook();
        match outcome {
            Ok(response) => done(&self.controller, Some(response)),
            Err(error) => {
                self.controller.set_failed(error);
                done(&self.controller, None);
            }
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let (kind, message) = self.abandoned;
            self.finish(done, Err(RpcError::new(kind, message)));
        }
    }
}

/// Typed handle a handler uses to answer one request
pub struct Reply<Resp> {
    completion: Completion,
    _response: PhantomData<fn(Resp)>,
}

impl<Resp: Message> Reply<Resp> {
    fn new(completion: Completion) -> Self {
        Self {
            completion,
            _response: PhantomData,
        }
    }

    pub fn controller(&self) -> &ControllerRef {
        self.completion.controller()
    }

    pub fn send(self, response: Resp) {
        self.completion.complete(Ok(DynMessage::new(response)));
    }

    pub fn fail(self, error: RpcError) {
        self.completion.complete(Err(error));
    }
}

type Handler = Arc<dyn Fn(DynMessage, Completion) + Send + Sync>;

/// Service backed by a method-name → handler table
pub struct DispatchService {
    descriptor: Arc<ServiceDescriptor>,
    handlers: HashMap<String, Handler>,
}

impl DispatchService {
    pub fn builder(full_name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder::new(full_name)
    }
}

impl Service for DispatchService {
    fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    fn call_method(
        &self,
        method: &Arc<MethodDescriptor>,
        controller: ControllerRef,
        request: DynMessage,
        response_type: MessageType,
        done: DoneCallback,
    ) {
        debug_assert_eq!(response_type, method.response_type());

        let completion = Completion::new(controller, done)
            .abandoned_with(ErrorKind::Application, "handler dropped its reply");

        if method.service_name() != self.descriptor.full_name() {
            completion.complete(Err(RpcError::new(
                ErrorKind::UnknownMethod,
                format!(
                    "{} does not belong to {}",
                    method.full_name(),
                    self.descriptor.full_name()
                ),
            )));
            return;
        }

        match self.handlers.get(method.name()) {
            Some(handler) => handler(request, completion),
            None => completion.complete(Err(RpcError::new(
                ErrorKind::UnknownMethod,
                format!("no handler for {}", method.full_name()),
            ))),
        }
    }
}

/// Builds a [`DispatchService`] one method at a time
pub struct ServiceBuilder {
    descriptor: ServiceDescriptorBuilder,
    handlers: HashMap<String, Handler>,
}

impl ServiceBuilder {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            descriptor: ServiceDescriptorBuilder::new(full_name),
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for method `name`.
    ///
    /// The request is downcast once before the handler runs; a request of
    /// the wrong type fails the call with [`ErrorKind::TypeMismatch`].
    pub fn method<Req, Resp, F>(mut self, name: &str, handler: F) -> Self
    where
        Req: Message,
        Resp: Message,
        F: Fn(Req, Reply<Resp>) + Send + Sync + 'static,
    {
        let erased: Handler = Arc::new(move |request: DynMessage, completion: Completion| {
            match request.downcast::<Req>() {
                Ok(request) => handler(request, Reply::new(completion)),
                Err(error) => completion.complete(Err(error)),
            }
        });
        self.descriptor = self.descriptor.method::<Req, Resp>(name);
        self.handlers.insert(name.to_owned(), erased);
        self
    }

    pub fn build(self) -> DispatchService {
        DispatchService {
            descriptor: self.descriptor.build(),
            handlers: self.handlers,
        }
    }
}
