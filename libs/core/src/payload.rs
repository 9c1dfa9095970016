use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ErrorKind, Result, RpcError};

/// Codec trait for serializing and deserializing message payloads
pub trait PayloadCodec: Send + Sync {
    /// Encode a value into bytes
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode bytes into a value
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Bincode codec for binary serialization
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl PayloadCodec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| RpcError::new(ErrorKind::EncodeFailure, e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes)
            .map_err(|e| RpcError::new(ErrorKind::DecodeFailure, e.to_string()))
    }
}
