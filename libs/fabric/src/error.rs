use std::time::Duration;

use meridian_core::{ErrorKind, RpcError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connect timeout exceeded after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Unknown resolver: {0}")]
    UnknownResolver(String),

    #[error("Unknown load balancer: {0}")]
    UnknownLoadBalancer(String),

    #[error("Event loop is no longer running")]
    EventLoopClosed,

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for RpcError {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::Rpc(inner) => return inner.clone(),
            Error::Io(_) | Error::ConnectTimeout(_) => ErrorKind::ConnectFailure,
            Error::InvalidEndpoint(_) => ErrorKind::ResolutionFailure,
            Error::EventLoopClosed => ErrorKind::Shutdown,
            Error::UnknownResolver(_) | Error::UnknownLoadBalancer(_) => ErrorKind::ConnectFailure,
        };
        RpcError::new(kind, error.to_string())
    }
}
