use std::sync::Arc;

use meridian_core::{
    Controller, ControllerRef, DoneCallback, DynMessage, ErrorKind, Message, MessageType,
    MethodDescriptor, RpcError, Service, ServiceDescriptor,
};

use crate::channel::Channel;

/// Client-side view of a remote service
///
/// Implements [`Service`] by forwarding every call to a [`Channel`], so
/// code written against the reflection interface works unchanged on either
/// side of the wire.
#[derive(Clone, Debug)]
pub struct RpcStub {
    channel: Channel,
    descriptor: Arc<ServiceDescriptor>,
}

impl RpcStub {
    pub fn new(channel: Channel, descriptor: Arc<ServiceDescriptor>) -> Self {
        Self {
            channel,
            descriptor,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Method descriptor by short name
    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.descriptor.method(name)
    }

    /// Call method `name` with a fresh controller and wait for the response
    pub async fn unary<Req, Resp>(&self, name: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Message,
        Resp: Message,
    {
        let method = self.method(name).ok_or_else(|| {
            RpcError::new(
                ErrorKind::UnknownMethod,
                format!("{} has no method {name}", self.descriptor.full_name()),
            )
        })?;
        let controller = Controller::new();
        self.channel.unary(method, &controller, request).await
    }
}

impl Service for RpcStub {
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
        self.channel.call_method(
            method,
            &controller,
            request.as_message(),
            response_type,
            done,
        );
    }
}
