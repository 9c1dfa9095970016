//! Runtime type identity for RPC messages.
//!
//! User types implement [`Message`]. Everything past the call boundary
//! handles them as [`DynMessage`], an owned value tagged with its
//! [`MessageType`], and converts back with a checked downcast.

use std::any::{Any, TypeId};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ErrorKind, Result, RpcError};
use crate::payload::{BincodeCodec, PayloadCodec};

/// A request or response type that can travel over a channel
///
/// `NAME` is the protocol-level type name, e.g. `"echo.EchoRequest"`.
pub trait Message: Serialize + DeserializeOwned + Default + fmt::Debug + Send + Sync + 'static {
    const NAME: &'static str;
}

/// Object-safe view of a [`Message`]
pub trait AnyMessage: Any + Send + Sync + fmt::Debug {
    fn message_type(&self) -> MessageType;

    /// Serialize the payload bytes of this message
    fn encode(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Message> AnyMessage for T {
    fn message_type(&self) -> MessageType {
        MessageType::of::<T>()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        BincodeCodec.encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Runtime type descriptor of a message, the prototype of the type
#[derive(Clone, Copy)]
pub struct MessageType {
    name: &'static str,
    type_id: TypeId,
    decode: fn(&[u8]) -> Result<DynMessage>,
    default: fn() -> DynMessage,
}

impl MessageType {
    pub fn of<T: Message>() -> Self {
        Self {
            name: T::NAME,
            type_id: TypeId::of::<T>(),
            decode: decode_as::<T>,
            default: default_of::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is<T: Message>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Decode payload bytes into a fresh instance of this type
    pub fn decode(&self, bytes: &[u8]) -> Result<DynMessage> {
        (self.decode)(bytes)
    }

    /// Materialize a default, mutable instance of this type
    pub fn new_instance(&self) -> DynMessage {
        (self.default)()
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for MessageType {}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageType").field(&self.name).finish()
    }
}

fn decode_as<T: Message>(bytes: &[u8]) -> Result<DynMessage> {
    BincodeCodec.decode::<T>(bytes).map(DynMessage::new)
}

fn default_of<T: Message>() -> DynMessage {
    DynMessage::new(T::default())
}

/// Owned message value carrying its runtime type tag
#[derive(Debug)]
pub struct DynMessage(Box<dyn AnyMessage>);

impl DynMessage {
    pub fn new<T: Message>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn message_type(&self) -> MessageType {
        self.0.message_type()
    }

    pub fn is<T: Message>(&self) -> bool {
        self.0.as_any().is::<T>()
    }

    pub fn as_message(&self) -> &dyn AnyMessage {
        self.0.as_ref()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.0.encode()
    }

    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Checked conversion into a concrete message type
    pub fn downcast<T: Message>(self) -> Result<T> {
        let actual = self.message_type().name();
        self.0
            .into_any()
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| {
                RpcError::new(
                    ErrorKind::TypeMismatch,
                    format!("expected {}, got {}", T::NAME, actual),
                )
            })
    }

    /// Convert a value whose type was already fixed by its prototype.
    ///
    /// A mismatch here means the peer and this process disagree on the
    /// protocol. Debug builds treat it as a fatal assertion; release builds
    /// report it as [`ErrorKind::TypeMismatch`].
    pub fn into_expected<T: Message>(self) -> Result<T> {
        debug_assert!(
            self.is::<T>(),
            "response type mismatch: expected {}, got {}",
            T::NAME,
            self.message_type().name()
        );
        self.downcast()
    }
}
