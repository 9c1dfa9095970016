use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal outcome category of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The resolver produced no usable endpoint
    ResolutionFailure,
    /// The transport could not establish a connection
    ConnectFailure,
    /// A request or frame could not be serialized
    EncodeFailure,
    /// A payload did not decode as the expected message type
    DecodeFailure,
    /// The byte stream desynchronized and the connection was closed
    MalformedFrame,
    /// The connection was lost before the call completed
    ConnectionClosed,
    /// No service is registered under the requested name
    UnknownService,
    /// The service has no handler for the requested method
    UnknownMethod,
    /// A message was not of the type the call declared
    TypeMismatch,
    /// The controller was cancelled before completion
    Cancelled,
    /// The call deadline elapsed
    Timeout,
    /// The channel was shut down or dropped
    Shutdown,
    /// The handler reported a failure
    Application,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolutionFailure => "resolution failure",
            Self::ConnectFailure => "connect failure",
            Self::EncodeFailure => "encode failure",
            Self::DecodeFailure => "decode failure",
            Self::MalformedFrame => "malformed frame",
            Self::ConnectionClosed => "connection closed",
            Self::UnknownService => "unknown service",
            Self::UnknownMethod => "unknown method",
            Self::TypeMismatch => "type mismatch",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
            Self::Application => "application error",
        };
        f.write_str(name)
    }
}

/// Error attached to a controller when a call fails
///
/// Serializable so a server can report it inside an error frame.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RpcError {
    kind: ErrorKind,
    message: String,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Application-level failure raised by handler code
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Application, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
