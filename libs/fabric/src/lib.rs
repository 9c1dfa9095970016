//! Meridian Fabric - RPC channel, wire codec and server runtime
//!
//! Runs asynchronous unary calls over TCP or Unix sockets. A [`Channel`]
//! multiplexes calls over one connection and correlates responses by call
//! id; an [`RpcServer`] dispatches incoming requests to registered
//! services. Both are driven by an [`EventLoop`].
//!
//! # Example
//!
//! ```no_run
//! use meridian_core::{DispatchService, Message, Reply};
//! use meridian_fabric::{EventLoop, RpcServer, RpcStub, Channel};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Ping { text: String }
//! impl Message for Ping { const NAME: &'static str = "demo.Ping"; }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_loop = EventLoop::new("rpc")?;
//!
//! let service = DispatchService::builder("demo.PingService")
//!     .method("Ping", |req: Ping, reply: Reply<Ping>| reply.send(req))
//!     .build();
//! let descriptor = meridian_core::Service::descriptor(&service).clone();
//!
//! let server = RpcServer::new(event_loop.handle());
//! server.register_service(service);
//! let endpoint = server.listen(&"127.0.0.1:0".parse()?).await?;
//!
//! let channel = Channel::new(event_loop.handle())?;
//! channel.connect(endpoint.to_string());
//! let stub = RpcStub::new(channel, descriptor);
//! let pong: Ping = stub.unary("Ping", &Ping { text: "hi".into() }).await?;
//! # Ok(())
//! # }
//! ```

pub mod balancer;
pub mod channel;
pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod event_loop;
pub mod options;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod server;
pub mod stub;
pub mod transport;

// Re-exports for convenience
pub use balancer::{LoadBalancer, RandomBalancer};
pub use channel::{Channel, ChannelBuilder};
pub use codec::{MessageKind, RpcCodec, RpcMessage};
pub use connection::Connection;
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use event_loop::{EventLoop, EventLoopHandle};
pub use options::ChannelOptions;
pub use registry::StrategyRegistry;
pub use resolver::{Resolver, StaticResolver};
pub use server::RpcServer;
pub use stub::RpcStub;
