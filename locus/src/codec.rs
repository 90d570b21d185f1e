//! Pluggable payload serialization.
//!
//! Envelopes have a fixed binary frame (see
//! [`Envelope::to_frame`](crate::messaging::Envelope::to_frame)); the
//! *payloads* they carry, transfer snapshots and location requests go through
//! a [`MessageCodec`]. Fibers are generic over the codec and default to
//! [`JsonCodec`], which is readable in logs and good enough for tests.
//!
//! # Custom codecs
//!
//! ```rust,ignore
//! #[derive(Clone, Default)]
//! struct BincodeCodec;
//!
//! impl MessageCodec for BincodeCodec {
//!     fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
//!         bincode::serialize(msg).map_err(|e| CodecError::Encode(e.into()))
//!     }
//!
//!     fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
//!         bincode::deserialize(buf).map_err(|e| CodecError::Decode(e.into()))
//!     }
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Boxed error produced by a codec backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] BoxError),

    /// Failed to decode bytes to a value.
    #[error("decode error: {0}")]
    Decode(#[source] BoxError),
}

/// Serialization format for payloads.
///
/// `Clone + 'static` so a fiber can hand copies to spawned tasks.
pub trait MessageCodec: Clone + 'static {
    /// Encode a value to bytes.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a value.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, EntityId, FiberId, ProcessId};
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Position {
        owner: Address,
        x: f32,
        y: f32,
    }

    #[test]
    fn test_address_is_encoded_as_integer() {
        let codec = JsonCodec;
        let addr = Address::encode(ProcessId(1), FiberId(0), EntityId(5)).expect("encode");

        let bytes = codec.encode(&addr).expect("encode should succeed");
        assert_eq!(bytes, addr.as_u64().to_string().into_bytes());

        let decoded: Address = codec.decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded, addr);
    }

    #[test]
    fn test_struct_with_address() {
        let codec = JsonCodec;
        let pos = Position {
            owner: Address::ZERO,
            x: 1.5,
            y: -2.0,
        };

        let bytes = codec.encode(&pos).expect("encode should succeed");
        let decoded: Position = codec.decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded, pos);
    }

    #[test]
    fn test_decode_error() {
        let codec = JsonCodec;
        let err = codec
            .decode::<Position>(b"{\"owner\": ")
            .expect_err("truncated input should fail");
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().starts_with("decode error"));
    }
}
