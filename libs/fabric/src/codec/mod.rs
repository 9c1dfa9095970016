//! Wire codec framing [`RpcMessage`]s on a byte stream.
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! +---------+-----------+------+---------+------------+--------+---------+
//! | magic   | body_len  | kind | call id | method_len | method | payload |
//! | "MR" 2B | u32       | u8   | u64     | u16        | UTF-8  | bytes   |
//! +---------+-----------+------+---------+------------+--------+---------+
//!            \_____________________ body_len bytes _____________________/
//! ```

use bytes::{Buf, BufMut, BytesMut};
use meridian_core::{ErrorKind, RpcError};
use thiserror::Error;

use crate::connection::Connection;

pub mod message;

pub use self::message::{MessageKind, RpcMessage};

pub const FRAME_MAGIC: [u8; 2] = *b"MR";

/// Magic plus body length
pub const HEADER_LEN: usize = 6;

/// Kind, call id and method length
const BODY_FIXED_LEN: usize = 1 + 8 + 2;

/// Max 100MB per frame to prevent DOS
pub const DEFAULT_MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Most buffer space reserved ahead of a partial frame's bytes
const RESERVE_STEP: usize = 64 * 1024;

pub type MessageCallback = Box<dyn Fn(&Connection, RpcMessage) + Send + Sync>;

/// Reasons a byte stream can no longer be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad frame magic {0:02x?}")]
    BadMagic([u8; 2]),

    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("frame body too short: {0} bytes")]
    BodyTooShort(usize),

    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    #[error("method name overruns frame body")]
    MethodOverrun,

    #[error("method name is not valid UTF-8")]
    InvalidMethodName,
}

impl From<FrameError> for RpcError {
    fn from(error: FrameError) -> Self {
        RpcError::new(ErrorKind::MalformedFrame, error.to_string())
    }
}

/// Frames outgoing messages and parses incoming ones
pub struct RpcCodec {
    max_frame_len: usize,
    message_callback: Option<MessageCallback>,
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// `max_frame_len` bounds the body of every frame, both directions
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            message_callback: None,
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Register the callback invoked once per decoded frame, replacing any prior one
    pub fn set_message_callback<F>(&mut self, callback: F)
    where
        F: Fn(&Connection, RpcMessage) + Send + Sync + 'static,
    {
        self.message_callback = Some(Box::new(callback));
    }

    /// Append one frame for `message` to `buffer`.
    ///
    /// On error the buffer is left untouched.
    pub fn serialize_to_buffer(&self, message: &RpcMessage, buffer: &mut BytesMut) -> Result<(), RpcError> {
        let method = message.method.as_bytes();
        let method_len = u16::try_from(method.len()).map_err(|_| {
            RpcError::new(
                ErrorKind::EncodeFailure,
                format!("method name too long: {} bytes", method.len()),
            )
        })?;

        let body_len = BODY_FIXED_LEN + method.len() + message.payload.len();
        if body_len > self.max_frame_len {
            return Err(RpcError::new(
                ErrorKind::EncodeFailure,
                format!("frame too large: {body_len} bytes (max {})", self.max_frame_len),
            ));
        }
        let body_len = u32::try_from(body_len).map_err(|_| {
            RpcError::new(ErrorKind::EncodeFailure, "frame exceeds u32 length")
        })?;

        buffer.reserve(HEADER_LEN + body_len as usize);
        buffer.put_slice(&FRAME_MAGIC);
        buffer.put_u32(body_len);
        buffer.put_u8(message.kind.as_u8());
        buffer.put_u64(message.id);
        buffer.put_u16(method_len);
        buffer.put_slice(method);
        buffer.put_slice(&message.payload);
        Ok(())
    }

    /// Decode the first frame in `buffer`, consuming its bytes.
    ///
    /// Returns `Ok(None)` while the frame is incomplete. An error means the
    /// stream is desynchronized; nothing after it can be trusted.
    pub fn decode_frame(&self, buffer: &mut BytesMut) -> Result<Option<RpcMessage>, FrameError> {
        if buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let magic = [buffer[0], buffer[1]];
        if magic != FRAME_MAGIC {
            return Err(FrameError::BadMagic(magic));
        }

        let body_len = u32::from_be_bytes([buffer[2], buffer[3], buffer[4], buffer[5]]) as usize;
        if body_len > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len: body_len,
                max: self.max_frame_len,
            });
        }
        if body_len < BODY_FIXED_LEN {
            return Err(FrameError::BodyTooShort(body_len));
        }

        let frame_len = HEADER_LEN + body_len;
        if buffer.len() < frame_len {
            buffer.reserve((frame_len - buffer.len()).min(RESERVE_STEP));
            return Ok(None);
        }

        buffer.advance(HEADER_LEN);
        let mut body = buffer.split_to(body_len);

        let kind = body.get_u8();
        let kind = MessageKind::from_u8(kind).ok_or(FrameError::UnknownKind(kind))?;
        let id = body.get_u64();
        let method_len = body.get_u16() as usize;
        if method_len > body.len() {
            return Err(FrameError::MethodOverrun);
        }
        let method = body.split_to(method_len);
        let method = std::str::from_utf8(&method)
            .map_err(|_| FrameError::InvalidMethodName)?
            .to_owned();

        Ok(Some(RpcMessage {
            kind,
            id,
            method,
            payload: body.freeze(),
        }))
    }

    /// Deliver every complete frame in `buffer` to the message callback.
    ///
    /// Trailing partial bytes stay in the buffer for the next read. A
    /// malformed frame closes `connection` with
    /// [`ErrorKind::MalformedFrame`] and discards the buffer. Returns the
    /// number of frames delivered.
    pub fn parse_from_buffer(&self, connection: &Connection, buffer: &mut BytesMut) -> usize {
        let mut delivered = 0;
        while connection.is_connected() {
            match self.decode_frame(buffer) {
                Ok(Some(message)) => {
                    tracing::trace!(
                        connection = connection.id(),
                        call_id = message.id,
                        kind = ?message.kind,
                        method = %message.method,
                        "frame decoded"
                    );
                    delivered += 1;
                    match &self.message_callback {
                        Some(callback) => callback(connection, message),
                        None => tracing::warn!(call_id = message.id, "no message callback registered; frame dropped"),
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::error!(
                        connection = connection.id(),
                        peer = %connection.peer(),
                        %error,
                        "malformed frame, closing connection"
                    );
                    buffer.clear();
                    connection.close_with_error(error.into());
                    break;
                }
            }
        }
        delivered
    }
}
