use bytes::Bytes;
use meridian_core::{BincodeCodec, ErrorKind, PayloadCodec, RpcError};

/// Role of a frame on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Request = 1,
    Response = 2,
    Error = 3,
}

impl MessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// RPC envelope carried by one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcMessage {
    pub kind: MessageKind,
    /// Correlation id shared by a request and its response
    pub id: u64,
    /// Qualified method name, e.g. `echo.EchoService.Echo`
    pub method: String,
    pub payload: Bytes,
}

impl RpcMessage {
    pub fn request(id: u64, method: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Request,
            id,
            method: method.into(),
            payload: payload.into(),
        }
    }

    pub fn response(id: u64, method: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Response,
            id,
            method: method.into(),
            payload: payload.into(),
        }
    }

    /// Error reply whose payload carries `error`
    pub fn error(id: u64, method: impl Into<String>, error: &RpcError) -> Self {
        let payload = BincodeCodec
            .encode(error)
            .unwrap_or_else(|_| error.message().as_bytes().to_vec());
        Self {
            kind: MessageKind::Error,
            id,
            method: method.into(),
            payload: payload.into(),
        }
    }

    /// Error carried by an error reply
    ///
    /// A payload that is not an encoded `RpcError` is reported as an
    /// application failure with the payload as text.
    pub fn remote_error(&self) -> RpcError {
        BincodeCodec.decode::<RpcError>(&self.payload).unwrap_or_else(|_| {
            RpcError::new(
                ErrorKind::Application,
                String::from_utf8_lossy(&self.payload).into_owned(),
            )
        })
    }
}
