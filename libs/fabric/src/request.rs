use std::sync::Arc;

use meridian_core::{Controller, Message, MethodDescriptor, RpcError};

use crate::channel::Channel;
use crate::event_loop::EventLoopHandle;
use crate::options::ChannelOptions;

/// Perform a one-off request/response
///
/// Builds a channel on `event_loop`, connects to `target`, issues one call
/// and shuts the channel down again.
pub async fn request<Req, Resp>(
    event_loop: &EventLoopHandle,
    target: &str,
    method: &Arc<MethodDescriptor>,
    request: &Req,
) -> Result<Resp, RpcError>
where
    Req: Message,
    Resp: Message,
{
    request_with_options(event_loop, ChannelOptions::default(), target, method, request).await
}

/// [`request`] with explicit channel options
pub async fn request_with_options<Req, Resp>(
    event_loop: &EventLoopHandle,
    options: ChannelOptions,
    target: &str,
    method: &Arc<MethodDescriptor>,
    request: &Req,
) -> Result<Resp, RpcError>
where
    Req: Message,
    Resp: Message,
{
    let channel = Channel::builder(event_loop.clone())
        .options(options)
        .build()?;
    channel.connect(target);

    let controller = Controller::new();
    let response = channel.unary(method, &controller, request).await;
    channel.shutdown();
    response
}
