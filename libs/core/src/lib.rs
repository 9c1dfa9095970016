//! Meridian Core - shared RPC contracts
//!
//! Message reflection, service descriptors, the per-call controller and the
//! [`Service`] dispatch surface used by both client stubs and servers.
//!
//! # Example
//!
//! ```
//! use meridian_core::{DispatchService, Message, Reply, Service};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Ping { seq: u32 }
//! impl Message for Ping { const NAME: &'static str = "demo.Ping"; }
//!
//! let service = DispatchService::builder("demo.PingService")
//!     .method("Ping", |req: Ping, reply: Reply<Ping>| reply.send(Ping { seq: req.seq + 1 }))
//!     .build();
//! assert!(service.descriptor().method("Ping").is_some());
//! ```

pub mod controller;
pub mod descriptor;
pub mod error;
pub mod message;
pub mod payload;
pub mod service;

// Re-exports for convenience
pub use controller::{Controller, ControllerRef};
pub use descriptor::{MethodDescriptor, ServiceDescriptor, ServiceDescriptorBuilder};
pub use error::{ErrorKind, Result, RpcError};
pub use message::{AnyMessage, DynMessage, Message, MessageType};
pub use payload::{BincodeCodec, PayloadCodec};
pub use service::{Completion, DispatchService, DoneCallback, Reply, Service, ServiceBuilder};
